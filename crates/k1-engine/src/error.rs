//! Engine error taxonomy
//!
//! Adapters translate their native errors into [`Error`]; the runner tags a
//! failing step's error with its key and otherwise passes it through.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification shared by every error the engine surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Precondition,
    Auth,
    NotFound,
    Conflict,
    Quota,
    Timeout,
    Cancelled,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Quota => "quota",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }

    /// Kinds that stop a destroy walk instead of being recorded.
    pub fn aborts_destroy(&self) -> bool {
        matches!(self, ErrorKind::Io | ErrorKind::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Precondition(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{message}{}", render_remediation(.remediation))]
    Conflict {
        message: String,
        remediation: Vec<String>,
    },

    #[error("{0}")]
    Quota(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("step `{key}` failed: {source}")]
    Step {
        key: String,
        #[source]
        source: Box<Error>,
    },
}

fn render_remediation(items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = String::from("; to continue:");
    for item in items {
        out.push_str("\n  - ");
        out.push_str(item);
    }
    out
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict {
            message: msg.into(),
            remediation: Vec::new(),
        }
    }

    pub fn conflict_with(msg: impl Into<String>, remediation: Vec<String>) -> Self {
        Error::Conflict {
            message: msg.into(),
            remediation,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Taxonomy of this error, looking through step tags.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Precondition(_) => ErrorKind::Precondition,
            Error::Auth(_) => ErrorKind::Auth,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Quota(_) => ErrorKind::Quota,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io { .. } => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Step { source, .. } => source.kind(),
        }
    }

    /// Key of the step this error was raised by, if it has been tagged.
    pub fn step_key(&self) -> Option<&str> {
        match self {
            Error::Step { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Wrap in a step tag. Already tagged errors keep their original key.
    pub fn tagged(self, key: &str) -> Self {
        match self {
            Error::Step { .. } => self,
            other => Error::Step {
                key: key.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The error without its step tag.
    pub fn untagged(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.untagged(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, Error>;
