//! Engine error taxonomy

use std::path::PathBuf;
use std::sync::Arc;

use catapt_schema::SchemaError;
use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Engine errors. Cloneable so a failed build can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed descriptor, unknown enumerated value, missing field.
    #[error("parse error: {0}")]
    Parse(String),

    /// Reserved name used, unresolved target, conflicting merge.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown component, build record, branch or tag.
    #[error("not found: {0}")]
    NotFound(String),

    /// Clone or checkout failed.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// No usable tag, or the branch is missing.
    #[error("pinning failed: {0}")]
    Pinning(String),

    /// Disk I/O, archive or compression failure.
    #[error("build failed: {0}")]
    Build(String),

    /// A path escaped the sandbox base.
    #[error("blocked path: {}", .0.display())]
    BlockedPath(PathBuf),

    /// Unexpected runtime failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// A cause wrapped with what the engine was doing at the time.
    #[error("{context}")]
    Context {
        /// What was being attempted.
        context: String,
        /// The underlying error.
        source: Arc<Error>,
    },
}

/// Error kinds, ignoring context layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ErrorKind {
    Parse,
    Validation,
    NotFound,
    Acquisition,
    Pinning,
    Build,
    BlockedPath,
    Internal,
}

impl Error {
    /// Wrap `self` with a description of the failed step.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Arc::new(self),
        }
    }

    /// Kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Acquisition(_) => ErrorKind::Acquisition,
            Self::Pinning(_) => ErrorKind::Pinning,
            Self::Build(_) => ErrorKind::Build,
            Self::BlockedPath(_) => ErrorKind::BlockedPath,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Context { source, .. } => source.kind(),
        }
    }

    /// Render the message and its cause chain, one `↳` per link.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut current: &dyn std::error::Error = self;
        while let Some(next) = current.source() {
            out.push_str("\n  ↳ ");
            out.push_str(&next.to_string());
            current = next;
        }
        out
    }

    pub(crate) fn build(msg: impl std::fmt::Display) -> Self {
        Self::Build(msg.to_string())
    }

    pub(crate) fn io(op: &str, path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Build(format!("{op} {}: {err}", path.display()))
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Parse(msg) => Self::Parse(msg),
            SchemaError::Validation(msg) => Self::Validation(msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Build(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

/// `.context()` on results, mirroring `anyhow::Context`.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with `context`.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Lazily computed variant of [`context`](Self::context).
    fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<C: Into<String>>(self, f: impl FnOnce() -> C) -> Result<T> {
        self.map_err(|e| e.into().context(f()))
    }
}
