#![forbid(unsafe_code)]

//! Node state, read-only snapshots and partial-state patches.

use serde::Serialize;
use serde_json::Value;

use crate::node::{NodeId, NodeKind};
use crate::path::Route;
use crate::validation::ValidationError;

/// Live, mutable state held inside a node cell.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeState {
    pub(crate) value: Value,
    pub(crate) init: Value,
    pub(crate) error: Option<ValidationError>,
    pub(crate) validated: bool,
    pub(crate) notice: Option<String>,
    pub(crate) touches: u32,
    pub(crate) visits: u32,
    pub(crate) any_touched: bool,
    pub(crate) any_visited: bool,
    /// The active field, if it is this node or one of its descendants.
    pub(crate) active: Option<NodeId>,
}

impl NodeState {
    pub(crate) fn new(init: Value) -> Self {
        Self {
            value: init.clone(),
            init,
            ..Self::default()
        }
    }
}

/// Read-only copy of a node's state plus derived flags.
///
/// Subscribers receive one of these after every change; [`Node::state`]
/// returns one on demand. Mutating it has no effect on the tree.
///
/// [`Node::state`]: crate::Node::state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Absolute route from the tree root.
    pub path: Route,
    pub value: Value,
    pub init: Value,
    pub error: Option<ValidationError>,
    pub notice: Option<String>,
    pub touches: u32,
    pub visits: u32,
    /// The active field in this subtree, if any.
    pub active: Option<NodeId>,
    pub any_touched: bool,
    pub any_visited: bool,
    pub is_touched: bool,
    pub is_visited: bool,
    /// This node or a descendant is the active field.
    pub is_active: bool,
    /// This node itself is the active field.
    pub is_focused: bool,
    pub is_pristine: bool,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub is_invalid: bool,
    /// A validator ran at least once (distinguishes "no error" from "unchecked").
    pub is_validated: bool,
    /// An async validation is still pending.
    pub is_validating: bool,
    pub is_initialized: bool,
}

/// How a counter patch combines with the current count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    /// Increase by `n` (saturating).
    Add(u32),
    /// Decrease by `n`, stopping at zero.
    Sub(u32),
    /// Reset to zero.
    Clear,
}

impl Tally {
    #[must_use]
    pub fn apply(self, count: u32) -> u32 {
        match self {
            Self::Add(n) => count.saturating_add(n),
            Self::Sub(n) => count.saturating_sub(n),
            Self::Clear => 0,
        }
    }
}

/// A partial state update. Unset fields leave state untouched.
///
/// Counter tallies apply to the target *and* every ancestor, so interior
/// nodes count the touches and visits of their whole subtree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    pub value: Option<Value>,
    pub init: Option<Value>,
    /// `Some(None)` records "checked, no error".
    pub error: Option<Option<ValidationError>>,
    pub notice: Option<Option<String>>,
    pub touches: Option<Tally>,
    pub visits: Option<Tally>,
}

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `touches += 1`.
    #[must_use]
    pub fn touch() -> Self {
        Self::new().with_touches(Tally::Add(1))
    }

    /// `touches = 0`.
    #[must_use]
    pub fn untouch() -> Self {
        Self::new().with_touches(Tally::Clear)
    }

    /// `visits += 1`.
    #[must_use]
    pub fn visit() -> Self {
        Self::new().with_visits(Tally::Add(1))
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn with_init(mut self, init: Value) -> Self {
        self.init = Some(init);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: Option<ValidationError>) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_notice(mut self, notice: Option<String>) -> Self {
        self.notice = Some(notice);
        self
    }

    #[must_use]
    pub fn with_touches(mut self, tally: Tally) -> Self {
        self.touches = Some(tally);
        self
    }

    #[must_use]
    pub fn with_visits(mut self, tally: Tally) -> Self {
        self.visits = Some(tally);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Options for [`Node::patch`](crate::Node::patch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Skip subscriber notification.
    pub silent: bool,
    /// Make the target the active field when the patch carries `visits`.
    pub activate: bool,
}

impl PatchOptions {
    #[must_use]
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn activating() -> Self {
        Self {
            activate: true,
            ..Self::default()
        }
    }
}

/// Options for [`Node::change_with`](crate::Node::change_with).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeOptions {
    /// Store the value verbatim, bypassing the override hook.
    pub force: bool,
    pub silent: bool,
}

impl ChangeOptions {
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            silent: false,
        }
    }
}

/// Options for [`Node::visit_with`](crate::Node::visit_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitOptions {
    /// Default: true.
    pub activate: bool,
    pub silent: bool,
}

impl Default for VisitOptions {
    fn default() -> Self {
        Self {
            activate: true,
            silent: false,
        }
    }
}
