#![forbid(unsafe_code)]

//! Error types for path parsing and structural tree mutations.
//!
//! Validation failures are *not* errors in this sense: they are ordinary data
//! stored on a node (see [`crate::validation::ValidationError`]). The types in
//! this module describe programming mistakes in the consuming UI tree, such as
//! registering a field set where a field already lives, and are surfaced
//! immediately through [`FormResult`].

use std::fmt;

use crate::node::NodeKind;
use crate::path::{Key, Route};

/// Why a path string could not be parsed into a [`Route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathErrorKind {
    /// Leading, trailing or doubled `.` separator.
    EmptySegment,
    /// `[` without a matching `]`.
    UnclosedBracket,
    /// `]` without a preceding `[`.
    UnexpectedBracket,
    /// Bracket contents are not a non-negative integer.
    InvalidIndex,
    /// The index is above [`crate::path::MAX_INDEX`].
    IndexTooLarge,
    /// A name directly follows `]` without a `.` separator.
    MissingSeparator,
}

impl PathErrorKind {
    fn describe(self) -> &'static str {
        match self {
            Self::EmptySegment => "empty path segment",
            Self::UnclosedBracket => "unclosed '['",
            Self::UnexpectedBracket => "unexpected ']'",
            Self::InvalidIndex => "array index must be a non-negative integer",
            Self::IndexTooLarge => "array index is too large",
            Self::MissingSeparator => "expected '.' before name",
        }
    }
}

/// A path string that is not valid `a.b[0].c` syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    /// The rejected input.
    pub input: String,
    /// Byte offset of the offending character.
    pub offset: usize,
    /// What went wrong.
    pub kind: PathErrorKind,
}

impl PathError {
    pub(crate) fn new(input: &str, offset: usize, kind: PathErrorKind) -> Self {
        Self {
            input: input.to_owned(),
            offset,
            kind,
        }
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid path {:?} at offset {}: {}",
            self.input,
            self.offset,
            self.kind.describe()
        )
    }
}

impl std::error::Error for PathError {}

/// Structural error raised by registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// A path string failed to parse.
    Path(PathError),
    /// The route is already registered with a different node kind.
    KindMismatch {
        path: Route,
        existing: NodeKind,
        requested: NodeKind,
    },
    /// A route segment walks through a node that cannot hold children.
    NotAContainer { path: Route, kind: NodeKind },
    /// An index segment under a field set, or a name segment under a field array.
    SegmentMismatch {
        path: Route,
        container: NodeKind,
        key: Key,
    },
    /// An intermediate container on the route has not been registered.
    MissingAncestor { path: Route },
    /// A different node is already registered at the route.
    Occupied { path: Route },
    /// The node being attached still belongs to another parent.
    AlreadyAttached { path: Route },
    /// Attaching the node would make it its own ancestor.
    Cycle { path: Route },
    /// No node is registered at the route.
    UnknownNode { path: Route },
    /// A form can only be a tree root.
    NestedForm { path: Route },
    /// An index segment above [`crate::path::MAX_INDEX`].
    IndexTooLarge { path: Route, index: usize },
    /// An index operation was called on something other than a field array.
    NotAnArray { path: Route, kind: NodeKind },
    /// The route is empty where a child key is required.
    EmptyRoute,
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(e) => write!(f, "{e}"),
            Self::KindMismatch {
                path,
                existing,
                requested,
            } => write!(
                f,
                "cannot register {requested} at '{path}': a {existing} is already registered there"
            ),
            Self::NotAContainer { path, kind } => {
                write!(f, "'{path}' is a {kind} and cannot hold children")
            }
            Self::SegmentMismatch {
                path,
                container,
                key,
            } => write!(f, "segment {key:?} is not valid under {container} '{path}'"),
            Self::MissingAncestor { path } => {
                write!(f, "no container is registered at '{path}'")
            }
            Self::Occupied { path } => write!(f, "another node is registered at '{path}'"),
            Self::AlreadyAttached { path } => {
                write!(f, "node '{path}' is attached to another parent")
            }
            Self::Cycle { path } => write!(f, "cannot attach '{path}' beneath itself"),
            Self::UnknownNode { path } => write!(f, "no node is registered at '{path}'"),
            Self::NestedForm { path } => write!(f, "cannot register a form at '{path}'"),
            Self::IndexTooLarge { path, index } => {
                write!(f, "index {index} under '{path}' exceeds the maximum array index")
            }
            Self::NotAnArray { path, kind } => {
                write!(f, "'{path}' is a {kind}, not a field array")
            }
            Self::EmptyRoute => write!(f, "route must name at least one segment"),
        }
    }
}

impl std::error::Error for FormError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Path(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PathError> for FormError {
    fn from(e: PathError) -> Self {
        Self::Path(e)
    }
}

/// Result type for structural tree operations.
pub type FormResult<T> = Result<T, FormError>;
