//! Adapter error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("{0} not found on PATH or in the tools directory")]
    NotInstalled(String),

    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Markers in provider output, checked in order.
const AUTH_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "bad credentials",
    "authentication",
    "permission denied (publickey)",
];
const NOT_FOUND_MARKERS: &[&str] = &["404", "not found", "notfound", "does not exist", "no such"];
const CONFLICT_MARKERS: &[&str] = &[
    "409",
    "already exists",
    "alreadyexists",
    "has already been taken",
    "already in use",
];
const QUOTA_MARKERS: &[&str] = &["quota", "limit exceeded", "rate limit"];

fn classify(text: &str) -> Option<k1_engine::ErrorKind> {
    use k1_engine::ErrorKind;
    let lower = text.to_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));
    if hit(AUTH_MARKERS) {
        Some(ErrorKind::Auth)
    } else if hit(NOT_FOUND_MARKERS) {
        Some(ErrorKind::NotFound)
    } else if hit(CONFLICT_MARKERS) {
        Some(ErrorKind::Conflict)
    } else if hit(QUOTA_MARKERS) {
        Some(ErrorKind::Quota)
    } else {
        None
    }
}

fn status_kind(status: u16) -> Option<k1_engine::ErrorKind> {
    use k1_engine::ErrorKind;
    match status {
        401 | 403 => Some(ErrorKind::Auth),
        404 => Some(ErrorKind::NotFound),
        409 | 422 => Some(ErrorKind::Conflict),
        429 => Some(ErrorKind::Quota),
        _ => None,
    }
}

fn with_kind(kind: Option<k1_engine::ErrorKind>, message: String) -> k1_engine::Error {
    use k1_engine::{Error, ErrorKind};
    match kind {
        Some(ErrorKind::Auth) => Error::Auth(message),
        Some(ErrorKind::NotFound) => Error::NotFound(message),
        Some(ErrorKind::Quota) => Error::Quota(message),
        Some(ErrorKind::Conflict) => Error::conflict(message),
        // A remote failure we cannot classify still blocks progress on
        // external state, and must not abort a destroy walk.
        _ => Error::conflict_with(
            message,
            vec!["fix the reported problem and re-run the same command".to_string()],
        ),
    }
}

impl From<AdapterError> for k1_engine::Error {
    fn from(err: AdapterError) -> Self {
        use k1_engine::Error;
        let message = err.to_string();
        match err {
            AdapterError::NotInstalled(_) | AdapterError::Unsupported(_) => {
                Error::Precondition(message)
            }
            AdapterError::CommandFailed { stderr, .. } => with_kind(classify(&stderr), message),
            AdapterError::Status { status, body, .. } => {
                with_kind(status_kind(status).or_else(|| classify(&body)), message)
            }
            AdapterError::Http(e) if e.is_timeout() => {
                Error::Timeout(format!("an HTTP response ({})", e))
            }
            AdapterError::Http(e) => match e.status() {
                Some(status) => with_kind(status_kind(status.as_u16()), message),
                None => with_kind(None, message),
            },
            AdapterError::Unexpected(_) | AdapterError::Json(_) | AdapterError::Zip(_) => {
                with_kind(None, message)
            }
            AdapterError::Io(e) => Error::io("adapter", e),
        }
    }
}
