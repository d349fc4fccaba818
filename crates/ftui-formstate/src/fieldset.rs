#![forbid(unsafe_code)]

//! Container operations: registration, path-addressed helpers, reset,
//! late initialization and serialization.
//!
//! These are available on every [`Node`]; the ones that walk children are
//! no-ops on fields.
//!
//! # Invariants
//!
//! - `register` is idempotent per resolved route: the same route and kind
//!   always yield the same node.
//! - Children registered while their container `is_initialized` are dynamic;
//!   `reset` unregisters them and restores everything else to `init`.
//! - `reset` twice equals `reset` once.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::config::NodeConfig;
use crate::error::{FormError, FormResult};
use crate::node::{
    Node, NodeKind, NodeRef, Upward, apply_patch, attach_child, check_segment, children_of,
    container_at, detach_child, preorder, propagate_up,
};
use crate::observe::Notifier;
use crate::path::{self, PathLike, Route};
use crate::state::{Patch, PatchOptions, Tally};

/// Describes a node a UI element wants registered.
#[derive(Debug, Clone)]
pub struct Registration {
    pub kind: NodeKind,
    /// Route relative to the node `register` is called on.
    pub route: Route,
    /// Used when the ancestor's `init` has nothing at the route.
    pub init: Value,
    pub config: NodeConfig,
}

impl Registration {
    #[must_use]
    pub fn new(kind: NodeKind, route: impl Into<Route>) -> Self {
        Self {
            kind,
            route: route.into(),
            init: Value::Null,
            config: NodeConfig::default(),
        }
    }

    #[must_use]
    pub fn field(route: impl Into<Route>) -> Self {
        Self::new(NodeKind::Field, route)
    }

    #[must_use]
    pub fn field_set(route: impl Into<Route>) -> Self {
        Self::new(NodeKind::FieldSet, route)
    }

    #[must_use]
    pub fn field_array(route: impl Into<Route>) -> Self {
        Self::new(NodeKind::FieldArray, route)
    }

    #[must_use]
    pub fn with_init(mut self, init: Value) -> Self {
        self.init = init;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }
}

impl Node {
    /// Return the node registered at `registration.route`, creating it if
    /// needed.
    ///
    /// Every segment but the last must already be a registered container.
    /// A new node starts from this node's `init` at the route, falling back
    /// to `registration.init`.
    pub fn register(&self, registration: Registration) -> FormResult<Node> {
        let Registration {
            kind,
            route,
            init,
            config,
        } = registration;
        let Some((key, parent_route)) = route.split_last() else {
            return Err(FormError::EmptyRoute);
        };
        if kind == NodeKind::Form {
            return Err(FormError::NestedForm {
                path: self.names().join(&route),
            });
        }
        let parent = container_at(&self.cell, parent_route)?;
        check_segment(&parent, key)?;

        let existing = parent.borrow().children.get(key).cloned();
        if let Some(existing) = existing {
            let existing_kind = existing.borrow().kind;
            return if existing_kind == kind {
                Ok(Node::from_ref(existing))
            } else {
                Err(FormError::KindMismatch {
                    path: existing.borrow().names.clone(),
                    existing: existing_kind,
                    requested: kind,
                })
            };
        }

        let initial = {
            let cell = self.cell.borrow();
            path::get(&cell.state.init, &route).cloned().unwrap_or(init)
        };
        let (names, tree) = {
            let p = parent.borrow();
            (p.names.child(key.clone()), p.tree.clone())
        };
        let node = Node::create(kind, names, initial, config, tree);

        let mut out = Notifier::new(false);
        attach_child(&parent, key.clone(), &node.cell, &mut out);
        tracing::debug!(
            path = %node.path(),
            kind = %kind,
            dynamic = node.is_dynamic(),
            "registered node"
        );
        out.flush();
        Ok(node)
    }

    /// Resolve `path` and [`change`](Node::change) that node.
    pub fn change_field(&self, path: impl PathLike, value: Value) -> FormResult<()> {
        self.get(path)?.change(value);
        Ok(())
    }

    /// Resolve `path` and touch that node; every node on the way to the root
    /// counts the touch.
    pub fn touch_field(&self, path: impl PathLike) -> FormResult<()> {
        self.get(path)?.touch();
        Ok(())
    }

    /// Resolve `path` and zero the touch counter of that node and every
    /// ancestor.
    pub fn untouch_field(&self, path: impl PathLike) -> FormResult<()> {
        self.get(path)?.untouch();
        Ok(())
    }

    /// Touch every descendant field once.
    pub fn touch_all(&self) {
        self.patch_leaves(Patch::touch());
    }

    /// Zero the touch counter of every descendant field.
    pub fn untouch_all(&self) {
        self.patch_leaves(Patch::untouch());
    }

    fn patch_leaves(&self, patch: Patch) {
        let mut out = Notifier::new(false);
        for node in preorder(&self.cell).iter().skip(1) {
            if node.borrow().kind == NodeKind::Field {
                apply_patch(node, patch.clone(), PatchOptions::default(), &mut out);
            }
        }
        out.flush();
    }

    /// Mark this container and every container below it as initialized.
    /// Children registered afterwards are dynamic.
    pub fn mark_initialized(&self) {
        for node in preorder(&self.cell) {
            let mut cell = node.borrow_mut();
            if cell.kind.is_container() {
                cell.initialized = true;
            }
        }
    }

    /// Replace `init` for this subtree with values from `init` and reset
    /// `value` to match. Children without an entry in `init` keep their own.
    pub fn initialize(&self, init: Value) {
        let _span = tracing::debug_span!("initialize", path = %self.path()).entered();
        let mut out = Notifier::new(false);
        initialize_subtree(&self.cell, init, &mut out);
        propagate_up(&self.cell, Upward::structure(), &mut out);
        out.flush();
    }

    /// Restore `value` to `init` and clear touches and visits throughout the
    /// subtree, unregistering dynamic children. The active field stays
    /// active, and errors are kept.
    ///
    /// Ancestors lose the touches and visits this subtree had counted.
    pub fn reset(&self) {
        let _span = tracing::debug_span!("reset", path = %self.path()).entered();
        let (touches, visits) = {
            let cell = self.cell.borrow();
            (cell.state.touches, cell.state.visits)
        };
        let mut out = Notifier::new(false);
        reset_subtree(&self.cell, &mut out);
        propagate_up(
            &self.cell,
            Upward {
                touches: Some(Tally::Sub(touches)),
                visits: Some(Tally::Sub(visits)),
                ..Upward::structure()
            },
            &mut out,
        );
        out.flush();
    }

    /// Plain nested value of this subtree, honouring serializer hooks.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serialize_node(&self.cell)
    }
}

fn initialize_subtree(node: &NodeRef, init: Value, out: &mut Notifier) {
    for (key, child) in children_of(node) {
        let child_init = path::get(&init, std::slice::from_ref(&key))
            .cloned()
            .unwrap_or_else(|| child.borrow().state.init.clone());
        initialize_subtree(&child, child_init, out);
    }
    {
        let mut cell = node.borrow_mut();
        cell.state.init = init;
        cell.recompose(false, true);
        cell.state.value = cell.state.init.clone();
        if cell.kind.is_container() {
            cell.initialized = true;
        }
    }
    out.push(node);
}

fn reset_subtree(node: &NodeRef, out: &mut Notifier) {
    let children = children_of(node);
    // Highest keys first so array removals never shift a pending key.
    for (key, child) in children.iter().rev() {
        if child.borrow().dynamic {
            detach_child(node, key, out);
        }
    }
    for (_, child) in &children {
        if child.borrow().parent().is_some() {
            reset_subtree(child, out);
        }
    }
    {
        let mut cell = node.borrow_mut();
        cell.state.value = cell.state.init.clone();
        cell.state.touches = 0;
        cell.state.visits = 0;
        cell.refresh_aggregates();
    }
    out.push(node);
}

fn serialize_node(node: &NodeRef) -> Value {
    let hook = node.borrow().config.serializer();
    if let Some(hook) = hook {
        return hook(&Node::from_ref(node.clone()));
    }
    let mut out = node.borrow().state.value.clone();
    for (key, child) in children_of(node) {
        path::set_in_place(&mut out, std::slice::from_ref(&key), serialize_node(&child));
    }
    out
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
