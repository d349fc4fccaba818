#![forbid(unsafe_code)]

//! Running validators over a subtree and collecting their results.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::node::{InFlight, Node, NodeRef, apply_patch, preorder};
use crate::observe::Notifier;
use crate::path;
use crate::state::{Patch, PatchOptions};

use super::{Deferred, Settlement, Validation, ValidationError, ValidationToken, ValidationTrace};

impl Node {
    /// Run this node's validator, if it has one.
    pub fn validate(&self) {
        let mut out = Notifier::new(false);
        run_validator(&self.cell, &mut out);
        out.flush();
    }

    /// Run every validator in the subtree, parents before children.
    ///
    /// Synchronous results are stored immediately. Pending results are parked
    /// on their node and applied whenever they settle; nothing already in
    /// flight is cancelled.
    pub fn validate_all(&self) {
        let _span = tracing::debug_span!("validate_all", path = %self.path()).entered();
        let mut out = Notifier::new(false);
        for node in preorder(&self.cell) {
            run_validator(&node, &mut out);
        }
        out.flush();
    }

    /// Every stored error in the subtree, keyed by path relative to this
    /// node. This node's own error uses [`FormConfig::self_key`].
    ///
    /// [`FormConfig::self_key`]: crate::FormConfig::self_key
    #[must_use]
    pub fn all_errors(&self) -> IndexMap<String, ValidationError> {
        self.collect(|cell| cell.state.error.clone())
    }

    /// Every parked async validation that has not resolved, keyed like
    /// [`Self::all_errors`]. Rejected handles stay listed.
    #[must_use]
    pub fn all_validations(&self) -> IndexMap<String, Deferred> {
        self.collect(|cell| {
            cell.pending
                .as_ref()
                .filter(|p| !matches!(p.deferred.settlement(), Settlement::Resolved(_)))
                .map(|p| p.deferred.clone())
        })
    }

    /// Copy of this tree's async validation trace.
    #[must_use]
    pub fn validation_trace(&self) -> ValidationTrace {
        self.cell.borrow().tree.ledger.borrow().trace().clone()
    }

    fn collect<T>(&self, pick: impl Fn(&crate::node::NodeCell) -> Option<T>) -> IndexMap<String, T> {
        let (base, self_key) = {
            let cell = self.cell.borrow();
            (cell.names.clone(), cell.tree.config.self_key.clone())
        };
        let mut out = IndexMap::new();
        for node in preorder(&self.cell) {
            let cell = node.borrow();
            let Some(item) = pick(&cell) else { continue };
            let key = if Rc::ptr_eq(&node, &self.cell) {
                self_key.clone()
            } else {
                cell.names
                    .strip_prefix(&base)
                    .map_or_else(|| cell.names.to_string(), |rel| path::join(&rel))
            };
            out.insert(key, item);
        }
        out
    }
}

fn run_validator(node: &NodeRef, out: &mut Notifier) {
    let (validator, value) = {
        let cell = node.borrow();
        let Some(validator) = cell.config.validator() else {
            return;
        };
        (validator, cell.state.value.clone())
    };
    match validator.validate(&value) {
        Validation::Valid => apply_patch(
            node,
            Patch::new().with_error(None),
            PatchOptions::default(),
            out,
        ),
        Validation::Invalid(error) => apply_patch(
            node,
            Patch::new().with_error(Some(error)),
            PatchOptions::default(),
            out,
        ),
        Validation::Pending(deferred) => park(node, deferred, out),
    }
}

fn park(node: &NodeRef, deferred: Deferred, out: &mut Notifier) {
    let token = {
        let mut cell = node.borrow_mut();
        let token = cell.tree.ledger.borrow_mut().start(cell.id, &cell.names);
        cell.pending = Some(InFlight {
            token,
            deferred: deferred.clone(),
        });
        token
    };
    out.push(node);
    let weak = Rc::downgrade(node);
    deferred.on_settle(move |settlement| {
        if let Some(node) = weak.upgrade() {
            settle(&node, token, settlement);
        }
    });
}

fn settle(node: &NodeRef, token: ValidationToken, settlement: &Settlement) {
    let error = {
        let mut cell = node.borrow_mut();
        let overtaken = cell.tree.ledger.borrow_mut().settle(cell.id, token, settlement);
        if let Some(newer) = overtaken {
            tracing::debug!(path = %cell.names, %token, %newer, "older validation settled after a newer one started");
        }
        match settlement {
            Settlement::Pending => return,
            Settlement::Resolved(error) => {
                cell.pending = None;
                error.clone()
            }
            Settlement::Rejected(reason) => {
                tracing::warn!(path = %cell.names, %token, reason = %reason, "async validation rejected");
                None
            }
        }
    };
    let mut out = Notifier::new(false);
    apply_patch(node, Patch::new().with_error(error), PatchOptions::default(), &mut out);
    out.flush();
}
