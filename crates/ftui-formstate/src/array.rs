#![forbid(unsafe_code)]

//! Index-based edits on field arrays.
//!
//! Edits apply to `value` and `init` alike, and registered children are
//! re-keyed so registry keys keep matching array positions. A re-keyed child
//! (and its whole subtree) gets new `names`; subscribers of every moved node
//! are notified.

use serde_json::Value;

use crate::error::{FormError, FormResult};
use crate::node::{Node, NodeKind, Upward, detach_child, propagate_up, rekey_children};
use crate::observe::Notifier;
use crate::path::{self, Key};

fn array_len(value: &Value) -> usize {
    value.as_array().map_or(0, Vec::len)
}

impl Node {
    fn expect_array(&self) -> FormResult<()> {
        let cell = self.cell.borrow();
        if cell.kind == NodeKind::FieldArray {
            Ok(())
        } else {
            Err(FormError::NotAnArray {
                path: cell.names.clone(),
                kind: cell.kind,
            })
        }
    }

    /// Number of items in the array value (0 for non-arrays).
    #[must_use]
    pub fn len(&self) -> usize {
        array_len(&self.cell.borrow().state.value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item.
    pub fn push(&self, item: Value) -> FormResult<()> {
        self.insert(self.len(), item)
    }

    /// Insert an item at `index` (clamped to the length), shifting later
    /// children up by one.
    pub fn insert(&self, index: usize, item: Value) -> FormResult<()> {
        self.expect_array()?;
        let at = {
            let mut cell = self.cell.borrow_mut();
            let at = index.min(array_len(&cell.state.value));
            path::insert_index(&mut cell.state.value, at, item.clone());
            path::insert_index(&mut cell.state.init, at, item);
            at
        };
        let mut out = Notifier::new(false);
        rekey_children(&self.cell, |i| if i >= at { i + 1 } else { i }, &mut out);
        out.push(&self.cell);
        propagate_up(&self.cell, Upward::structure(), &mut out);
        out.flush();
        Ok(())
    }

    /// Remove the item at `index`, unregistering its node if one is
    /// registered. Returns false when `index` is out of range.
    pub fn remove(&self, index: usize) -> FormResult<bool> {
        self.expect_array()?;
        let mut out = Notifier::new(false);
        if detach_child(&self.cell, &Key::Index(index), &mut out) {
            out.flush();
            return Ok(true);
        }
        let removed = {
            let mut cell = self.cell.borrow_mut();
            if index >= array_len(&cell.state.value) {
                return Ok(false);
            }
            let at = [Key::Index(index)];
            path::unset_in_place(&mut cell.state.value, &at);
            path::unset_in_place(&mut cell.state.init, &at);
            index
        };
        rekey_children(
            &self.cell,
            |i| if i > removed { i - 1 } else { i },
            &mut out,
        );
        out.push(&self.cell);
        propagate_up(&self.cell, Upward::structure(), &mut out);
        out.flush();
        Ok(true)
    }

    /// Move the item at `from` to `to`, shifting the items in between.
    /// Returns false when either index is out of range.
    pub fn move_item(&self, from: usize, to: usize) -> FormResult<bool> {
        self.expect_array()?;
        {
            let mut cell = self.cell.borrow_mut();
            let len = array_len(&cell.state.value);
            if from >= len || to >= len {
                return Ok(false);
            }
            if from == to {
                return Ok(true);
            }
            let state = &mut cell.state;
            for slot in [&mut state.value, &mut state.init] {
                if let Value::Array(items) = slot
                    && from < items.len()
                    && to < items.len()
                {
                    let item = items.remove(from);
                    items.insert(to, item);
                }
            }
        }
        let remap = move |i: usize| {
            if i == from {
                to
            } else if from < to && i > from && i <= to {
                i - 1
            } else if to < from && i >= to && i < from {
                i + 1
            } else {
                i
            }
        };
        let mut out = Notifier::new(false);
        rekey_children(&self.cell, remap, &mut out);
        out.push(&self.cell);
        propagate_up(&self.cell, Upward::structure(), &mut out);
        out.flush();
        Ok(true)
    }
}
