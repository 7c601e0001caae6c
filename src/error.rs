use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single model call, or of a whole retried invocation
#[derive(Error, Debug, Clone)]
pub enum InvocationError {
    /// The attempt did not finish within the per-attempt bound
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure, broken pipe and friends
    #[error("connection failed: {0}")]
    Connection(String),

    /// Provider answered with a non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Credentials or session cookie were rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Provider refused the request without an HTTP status we can inspect
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Reply arrived but could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Anything else; treated as transient
    #[error("{0}")]
    Other(String),

    /// Every attempt failed; carries the last cause
    #[error("invocation failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<InvocationError>,
    },
}

impl InvocationError {
    /// Status code carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            InvocationError::Http { status, .. } => Some(*status),
            InvocationError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Map a `reqwest` transport error onto the taxonomy
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return InvocationError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }
        if err.is_timeout() {
            return InvocationError::Other(format!("transport timeout: {}", err));
        }
        if err.is_connect() || err.is_request() {
            return InvocationError::Connection(err.to_string());
        }
        if err.is_decode() {
            return InvocationError::InvalidResponse(err.to_string());
        }
        InvocationError::Other(err.to_string())
    }
}

/// Errors surfaced by an evaluation unit
#[derive(Error, Debug)]
pub enum EvalError {
    /// Bad prompt template, unknown model id, unresolvable provider
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("failed to write {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
