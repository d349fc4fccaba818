#![forbid(unsafe_code)]

//! The form: a named root node that owns tree-wide settings.
//!
//! A [`Form`] is a [`Node`] of kind [`NodeKind::Form`] created with its own
//! [`FormConfig`]. Every node registered beneath it shares that config and the
//! async validation ledger. The form dereferences to its root node, so all
//! container operations (`register`, `reset`, `validate_all`, ...) are called
//! on it directly.

use std::fmt;
use std::ops::Deref;

use indexmap::IndexMap;
use serde_json::Value;

use crate::config::{FormConfig, NodeConfig};
use crate::node::{Node, NodeKind, Tree, preorder};
use crate::path::Route;
use crate::validation::ValidationError;

/// Outcome of [`Form::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Every validator passed; carries the serialized form value.
    Ready(Value),
    /// At least one node holds an error.
    Invalid(IndexMap<String, ValidationError>),
    /// Async validations are still running at these paths.
    Pending(Vec<String>),
}

impl Submission {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Root of a form-state tree.
#[derive(Clone)]
pub struct Form {
    name: String,
    root: Node,
}

impl Form {
    /// Create a form with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>, init: Value) -> Self {
        Self::with_config(name, init, FormConfig::default())
    }

    #[must_use]
    pub fn with_config(name: impl Into<String>, init: Value, config: FormConfig) -> Self {
        let name = name.into();
        tracing::debug!(form = %name, "created form");
        let root = Node::create(
            NodeKind::Form,
            Route::root(),
            init,
            NodeConfig::default(),
            Tree::new(config),
        );
        Self { name, root }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root node.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.root
    }

    /// The currently active (focused) field, if any.
    #[must_use]
    pub fn active(&self) -> Option<Node> {
        let id = self.root.cell.borrow().state.active?;
        preorder(&self.root.cell)
            .into_iter()
            .find(|node| node.borrow().id == id)
            .map(Node::from_ref)
    }

    /// Touch every field, run every validator, and report whether the form
    /// can be submitted.
    ///
    /// Pending async validations take precedence over stored errors, since a
    /// pending result may still add or clear one.
    pub fn submit(&self) -> Submission {
        let _span = tracing::debug_span!("submit", form = %self.name).entered();
        self.root.touch_all();
        self.root.validate_all();

        let pending: Vec<String> = self
            .root
            .all_validations()
            .into_iter()
            .filter(|(_, deferred)| deferred.is_pending())
            .map(|(path, _)| path)
            .collect();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "submission waiting on async validation");
            return Submission::Pending(pending);
        }

        let errors = self.root.all_errors();
        if errors.is_empty() {
            Submission::Ready(self.root.to_json())
        } else {
            tracing::debug!(count = errors.len(), "submission blocked by errors");
            Submission::Invalid(errors)
        }
    }
}

impl Deref for Form {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.root
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish()
    }
}
