#![forbid(unsafe_code)]

//! Hierarchical form-state model for FrankenTUI forms.
//!
//! A form is a tree of nodes mirroring a nested JSON value:
//!
//! - **fields** hold a leaf value,
//! - **field sets** hold named children,
//! - **field arrays** hold index-keyed children,
//! - the **form** is the root field set and owns tree-wide settings.
//!
//! Each node tracks `value`, `init`, touch and visit counters, a validation
//! error, and whether it (or a descendant) is the active field. Changing any
//! node recomposes every ancestor's value; assigning a container's value
//! pushes the pieces down into its children. Subscribers receive a
//! [`Snapshot`] after every mutation that affects their node.
//!
//! # Example
//!
//! ```
//! use ftui_formstate::{Form, Registration};
//! use serde_json::json;
//!
//! let form = Form::new("profile", json!({ "name": "", "tags": ["a"] }));
//! let name = form.register(Registration::field("name")).unwrap();
//! let tags = form.register(Registration::field_array("tags")).unwrap();
//!
//! name.change(json!("Ada"));
//! tags.push(json!("b")).unwrap();
//! assert_eq!(form.to_json(), json!({ "name": "Ada", "tags": ["a", "b"] }));
//!
//! name.visit();
//! assert_eq!(form.active(), Some(name.clone()));
//! assert!(form.state().is_dirty);
//!
//! form.reset();
//! assert_eq!(name.value(), json!(""));
//! ```
//!
//! Everything here is single-threaded (`Rc`/`RefCell`); the only async
//! boundary is a validator returning [`Validation::Pending`].

pub mod array;
pub mod config;
pub mod error;
pub mod field;
pub mod fieldset;
pub mod form;
pub mod node;
pub mod observe;
pub mod path;
pub mod state;
pub mod validation;

pub use config::{FormConfig, NodeConfig, OverrideFn, SerializeFn};
pub use error::{FormError, FormResult, PathError, PathErrorKind};
pub use fieldset::Registration;
pub use form::{Form, Submission};
pub use node::{Node, NodeId, NodeKind};
pub use observe::{SubId, Subscription};
pub use path::{Key, PathLike, Route};
pub use state::{ChangeOptions, Patch, PatchOptions, Snapshot, Tally, VisitOptions};
pub use validation::{
    Deferred, Resolver, Settlement, ValidationError, ValidationEvent, ValidationLedger,
    ValidationToken, ValidationTrace, Validation, Validator,
};
