#![forbid(unsafe_code)]

//! Token bookkeeping and event trace for async validations.
//!
//! Every pending validation parked on a node receives a monotonically
//! increasing [`ValidationToken`]. Unlike a cancelling coordinator, the ledger
//! never discards results: when an older token settles after a newer one was
//! issued for the same node, the settlement is still applied and an
//! [`ValidationEvent::Overtaken`] event records the race.
//!
//! # Invariants
//!
//! - Tokens are strictly monotonic per tree; `ValidationToken::NONE` (0) is
//!   never issued.
//! - A node's latest token is forgotten only when that exact token settles.
//! - The trace holds at most `capacity` events, evicting the oldest first.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use crate::node::NodeId;
use crate::path::Route;

use super::Settlement;

/// Version stamp of one async validation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ValidationToken(u64);

impl ValidationToken {
    /// Reserved for "no validation".
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// An event in the async validation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidationEvent {
    /// A pending handle was parked on a node.
    Started {
        token: ValidationToken,
        node: NodeId,
        path: String,
    },
    /// The handle resolved and its result was applied.
    Resolved {
        token: ValidationToken,
        is_valid: bool,
    },
    /// The handle was rejected; the node's error was cleared.
    Rejected { token: ValidationToken },
    /// The handle settled after a newer validation started for the same node.
    Overtaken {
        token: ValidationToken,
        newer: ValidationToken,
    },
}

impl ValidationEvent {
    #[must_use]
    pub fn token(&self) -> ValidationToken {
        match self {
            Self::Started { token, .. }
            | Self::Resolved { token, .. }
            | Self::Rejected { token }
            | Self::Overtaken { token, .. } => *token,
        }
    }

    /// Event type name for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Resolved { .. } => "resolved",
            Self::Rejected { .. } => "rejected",
            Self::Overtaken { .. } => "overtaken",
        }
    }
}

/// Bounded log of [`ValidationEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct ValidationTrace {
    events: VecDeque<ValidationEvent>,
    capacity: usize,
}

impl ValidationTrace {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, event: ValidationEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &ValidationEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn contains_event_type(&self, token: ValidationToken, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.token() == token && e.event_type() == event_type)
    }

    #[must_use]
    pub fn events_for_token(&self, token: ValidationToken) -> Vec<&ValidationEvent> {
        self.events.iter().filter(|e| e.token() == token).collect()
    }

    /// Order-sensitive checksum for golden comparisons.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for event in &self.events {
            event.hash(&mut hasher);
        }
        hasher.finish()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Returns a description of every broken invariant.
    #[must_use]
    pub fn verify_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        let mut last_started = ValidationToken::NONE;
        let mut started = HashSet::new();
        let first_started = self.events.iter().find_map(|e| match e {
            ValidationEvent::Started { token, .. } => Some(*token),
            _ => None,
        });

        for event in &self.events {
            match event {
                ValidationEvent::Started { token, .. } => {
                    if *token <= last_started {
                        violations.push(format!(
                            "Non-monotonic start token: {token} after {last_started}"
                        ));
                    }
                    last_started = *token;
                    started.insert(*token);
                }
                ValidationEvent::Overtaken { token, newer } if newer <= token => {
                    violations.push(format!("Overtaken by non-newer token: {newer} <= {token}"));
                }
                ValidationEvent::Resolved { token, .. } | ValidationEvent::Rejected { token } => {
                    // Starts older than the retained window may have been evicted.
                    let in_window = first_started.is_some_and(|first| *token >= first);
                    if in_window && !started.contains(token) {
                        violations.push(format!("Settled before start: {token}"));
                    }
                }
                ValidationEvent::Overtaken { .. } => {}
            }
        }

        violations
    }
}

/// Per-tree token issuer and trace.
#[derive(Debug)]
pub struct ValidationLedger {
    next_token: u64,
    latest: HashMap<NodeId, ValidationToken>,
    trace: ValidationTrace,
}

impl Default for ValidationLedger {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ValidationLedger {
    #[must_use]
    pub fn new(trace_capacity: usize) -> Self {
        Self {
            next_token: 1,
            latest: HashMap::new(),
            trace: ValidationTrace::with_capacity(trace_capacity),
        }
    }

    /// Issue a token for a validation that just went pending on `node`.
    pub fn start(&mut self, node: NodeId, path: &Route) -> ValidationToken {
        let token = ValidationToken(self.next_token);
        self.next_token += 1;
        self.latest.insert(node, token);
        self.trace.push(ValidationEvent::Started {
            token,
            node,
            path: path.to_string(),
        });
        token
    }

    /// Record a settlement. Returns the newer token when this one was overtaken.
    pub fn settle(
        &mut self,
        node: NodeId,
        token: ValidationToken,
        settlement: &Settlement,
    ) -> Option<ValidationToken> {
        match settlement {
            Settlement::Pending => return None,
            Settlement::Resolved(error) => self.trace.push(ValidationEvent::Resolved {
                token,
                is_valid: error.is_none(),
            }),
            Settlement::Rejected(_) => self.trace.push(ValidationEvent::Rejected { token }),
        }

        match self.latest.get(&node).copied() {
            Some(latest) if latest == token => {
                self.latest.remove(&node);
                None
            }
            Some(latest) if latest > token => {
                self.trace.push(ValidationEvent::Overtaken {
                    token,
                    newer: latest,
                });
                Some(latest)
            }
            _ => None,
        }
    }

    /// Most recent unsettled token for `node`.
    #[must_use]
    pub fn latest_token(&self, node: NodeId) -> Option<ValidationToken> {
        self.latest.get(&node).copied()
    }

    /// Nodes whose latest validation has not settled.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.latest.len()
    }

    #[must_use]
    pub fn trace(&self) -> &ValidationTrace {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// `Ok` when the trace satisfies its invariants.
    pub fn verify_trace(&self) -> Result<(), Vec<String>> {
        let violations = self.trace.verify_invariants();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
