#![forbid(unsafe_code)]

//! Tree-wide and per-node configuration.
//!
//! [`FormConfig`] is plain data shared by every node of one tree (it can be
//! loaded from JSON alongside other settings). [`NodeConfig`] carries the
//! optional behaviour hooks a single node was registered with.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::Node;
use crate::validation::{Validation, Validator};

/// Settings shared by every node in a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
    /// Key under which a node's own error appears in
    /// [`Node::all_errors`] and [`Node::all_validations`].
    ///
    /// Default: `"$self"`.
    pub self_key: String,

    /// Maximum number of async validation events kept in the tree's trace.
    /// Oldest events are evicted first. Zero disables tracing.
    ///
    /// Default: 256.
    pub trace_capacity: usize,

    /// Emit a `tracing::trace!` event for every applied patch.
    ///
    /// Default: false.
    pub enable_logging: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            self_key: "$self".to_owned(),
            trace_capacity: 256,
            enable_logging: false,
        }
    }
}

impl FormConfig {
    /// Use a different key for a node's own error entry.
    #[must_use]
    pub fn with_self_key(mut self, key: impl Into<String>) -> Self {
        self.self_key = key.into();
        self
    }

    /// Bound the async validation trace.
    #[must_use]
    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }

    /// Enable per-patch trace logging.
    #[must_use]
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }
}

/// Rewrites a proposed value before it is stored: `(next, sibling_values)`,
/// where `sibling_values` is the parent's current value (or `null` when the
/// node is detached).
pub type OverrideFn = Rc<dyn Fn(&Value, &Value) -> Value>;

/// Produces the serialized form of a node in place of the structural walk.
pub type SerializeFn = Rc<dyn Fn(&Node) -> Value>;

/// Optional behaviour hooks for one node.
///
/// | Hook        | Signature                         | Default            |
/// |-------------|-----------------------------------|--------------------|
/// | `validate`  | `Fn(&Value) -> Validation`        | none (never runs)  |
/// | `override`  | `Fn(&Value, &Value) -> Value`     | identity           |
/// | `serialize` | `Fn(&Node) -> Value`              | structural walk    |
///
/// Hooks are always invoked with no tree borrow held, so they may read (and
/// even mutate) the tree.
#[derive(Clone, Default)]
pub struct NodeConfig {
    validator: Option<Rc<dyn Validator>>,
    override_value: Option<OverrideFn>,
    serializer: Option<SerializeFn>,
}

impl NodeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a validator run by [`Node::validate`] and [`Node::validate_all`].
    #[must_use]
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }

    /// Shorthand for a closure validator.
    #[must_use]
    pub fn with_validate(self, validate: impl Fn(&Value) -> Validation + 'static) -> Self {
        self.with_validator(validate)
    }

    /// Rewrite values passed to [`Node::change`] unless the change is forced.
    #[must_use]
    pub fn with_override(mut self, hook: impl Fn(&Value, &Value) -> Value + 'static) -> Self {
        self.override_value = Some(Rc::new(hook));
        self
    }

    /// Replace the default serialization of this node.
    #[must_use]
    pub fn with_serializer(mut self, hook: impl Fn(&Node) -> Value + 'static) -> Self {
        self.serializer = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    pub(crate) fn validator(&self) -> Option<Rc<dyn Validator>> {
        self.validator.clone()
    }

    pub(crate) fn override_hook(&self) -> Option<OverrideFn> {
        self.override_value.clone()
    }

    pub(crate) fn serializer(&self) -> Option<SerializeFn> {
        self.serializer.clone()
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("validate", &self.validator.is_some())
            .field("override", &self.override_value.is_some())
            .field("serialize", &self.serializer.is_some())
            .finish()
    }
}
