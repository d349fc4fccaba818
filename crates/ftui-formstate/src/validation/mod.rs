#![forbid(unsafe_code)]

//! Validation results and tree-wide aggregation.
//!
//! A node's validator turns its current value into a [`Validation`]:
//!
//! - [`Validation::Valid`]: stored as "checked, no error".
//! - [`Validation::Invalid`]: the error is stored on the node.
//! - [`Validation::Pending`]: a [`Deferred`] handle is parked on the node and
//!   its eventual settlement is patched back in.
//!
//! There is no cancellation. Each [`Node::validate_all`](crate::Node::validate_all)
//! issues fresh handles and every settlement is applied when it arrives, so the
//! last resolution to land wins even if a newer validation is still pending.
//! The per-tree [`ValidationLedger`] records this ordering in a bounded
//! [`ValidationTrace`].
//!
//! # Example
//!
//! ```
//! use ftui_formstate::{Form, NodeConfig, Registration, Validation, ValidationError};
//! use serde_json::json;
//!
//! let form = Form::new("signup", json!({ "name": "" }));
//! let required = NodeConfig::new().with_validate(|value| {
//!     if value.as_str().is_some_and(|s| !s.is_empty()) {
//!         Validation::Valid
//!     } else {
//!         ValidationError::new("required", "name is required").into()
//!     }
//! });
//! form.register(Registration::field("name").with_config(required)).unwrap();
//!
//! form.validate_all();
//! assert_eq!(form.all_errors()["name"].code, "required");
//! ```

mod aggregate;
pub mod deferred;
pub mod ledger;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use deferred::{Deferred, Resolver, Settlement};
pub use ledger::{ValidationEvent, ValidationLedger, ValidationToken, ValidationTrace};

/// Error code used by [`ValidationError::msg`].
pub const ERROR_CODE_INVALID: &str = "invalid";

/// A validation failure stored on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Stable error code for programmatic handling and i18n.
    pub code: Cow<'static, str>,
    /// Message template; `{key}` placeholders are filled from `params`.
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ValidationError {
    #[must_use]
    pub fn new(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: BTreeMap::new(),
        }
    }

    /// An error with the generic [`ERROR_CODE_INVALID`] code.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(ERROR_CODE_INVALID, message)
    }

    /// Add a parameter for `{key}` interpolation.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// The message with every `{key}` replaced by its parameter.
    #[must_use]
    pub fn format_message(&self) -> String {
        let mut result = self.message.clone();
        for (key, value) in &self.params {
            result = result.replace(&format!("{{{key}}}"), value);
        }
        result
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_message())
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of running a validator.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Validation {
    #[default]
    Valid,
    Invalid(ValidationError),
    /// Result arrives later through the handle's [`Resolver`].
    Pending(Deferred),
}

impl Validation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            Self::Invalid(e) => Some(e),
            Self::Valid | Self::Pending(_) => None,
        }
    }
}

impl From<ValidationError> for Validation {
    fn from(error: ValidationError) -> Self {
        Self::Invalid(error)
    }
}

impl From<Option<ValidationError>> for Validation {
    fn from(error: Option<ValidationError>) -> Self {
        error.map_or(Self::Valid, Self::Invalid)
    }
}

impl From<Deferred> for Validation {
    fn from(deferred: Deferred) -> Self {
        Self::Pending(deferred)
    }
}

/// Checks a node's value.
///
/// Implemented for every `Fn(&Value) -> Validation`. Panics inside a validator
/// are not caught; they unwind out of the `validate` call that ran it.
pub trait Validator {
    fn validate(&self, value: &Value) -> Validation;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Validation,
{
    fn validate(&self, value: &Value) -> Validation {
        self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_message_interpolates_params() {
        let err = ValidationError::new("min_length", "at least {min} characters")
            .with_param("min", 3);
        assert_eq!(err.format_message(), "at least 3 characters");
        assert_eq!(err.to_string(), "at least 3 characters");
    }

    #[test]
    fn msg_uses_generic_code() {
        assert_eq!(ValidationError::msg("nope").code, ERROR_CODE_INVALID);
    }

    #[test]
    fn option_conversion() {
        assert!(Validation::from(None).is_valid());
        let invalid = Validation::from(Some(ValidationError::msg("x")));
        assert_eq!(invalid.error().map(|e| e.message.as_str()), Some("x"));
    }

    #[test]
    fn closures_are_validators() {
        let non_null = |v: &Value| -> Validation {
            if v.is_null() {
                ValidationError::msg("missing").into()
            } else {
                Validation::Valid
            }
        };
        assert!(non_null.validate(&json!(1)).is_valid());
        assert!(non_null.validate(&Value::Null).is_invalid());
    }

    #[test]
    fn error_serializes_without_empty_params() {
        let err = ValidationError::new("required", "required");
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"code":"required","message":"required"}"#
        );
    }
}
