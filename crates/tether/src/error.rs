//! Error and warning types.

use std::fmt;

use tether_keypath::KeypathError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("invalid keypath: {0}")]
    InvalidKeypath(#[from] KeypathError),
    #[error("cannot write to read-only keypath '{keypath}'")]
    ReadOnlyViolation { keypath: String },
    #[error("value at '{keypath}' is not an array")]
    NotAnArray { keypath: String },
    #[error("unknown viewmodel {0}")]
    UnknownViewmodel(u32),
    #[error("unknown scope {0}")]
    UnknownScope(u32),
    #[error("unknown node {0}")]
    UnknownNode(u32),
    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("reference '{reference}' could not be resolved")]
    UnresolvedReference { reference: String },
    #[error("config parse failed: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn invalid(reference: impl Into<String>, reason: impl fmt::Display) -> Self {
        StoreError::InvalidReference {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

/// Non-fatal conditions reported while wiring bindings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A two-way binding had to force-resolve its reference.
    #[error(
        "the '{reference}' reference used for two-way binding is ambiguous; \
         initialise the data to remove the ambiguity"
    )]
    AmbiguousReference { reference: String },
    /// A two-way binding targets a read-only node and degraded to one-way.
    #[error("cannot use two-way binding: '{keypath}' is read-only")]
    ReadOnlyBinding { keypath: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_messages() {
        let warning = Warning::ReadOnlyBinding {
            keypath: "total".to_string(),
        };
        assert_eq!(warning.to_string(), "cannot use two-way binding: 'total' is read-only");
        let warning = Warning::AmbiguousReference {
            reference: "draft".to_string(),
        };
        assert!(warning.to_string().starts_with("the 'draft' reference"));
        let err = StoreError::from(KeypathError::DanglingEscape);
        assert_eq!(err.to_string(), "invalid keypath: dangling escape at end of keypath");
    }
}
