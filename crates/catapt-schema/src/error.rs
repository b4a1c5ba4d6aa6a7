use thiserror::Error;

/// Errors raised while parsing or validating schema documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Malformed text, unknown enumerated value, or missing required field.
    #[error("parse error: {0}")]
    Parse(String),

    /// Well-formed input that breaks a naming or reference rule.
    #[error("validation error: {0}")]
    Validation(String),
}

impl SchemaError {
    pub(crate) fn parse(msg: impl std::fmt::Display) -> Self {
        Self::Parse(msg.to_string())
    }

    pub(crate) fn validation(msg: impl std::fmt::Display) -> Self {
        Self::Validation(msg.to_string())
    }
}
