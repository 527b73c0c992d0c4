// src/error.rs
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Connection to remote environment failed: {0}")]
    Connection(String),

    #[error("Remote execution failed: {0}")]
    Execution(String),

    #[error("Method '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Environment '{environment}': {message}")]
    Environment {
        environment: String,
        method: Option<String>,
        message: String,
        timed_out: bool,
    },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Environment { timed_out: true, .. }
        )
    }

    /// Uniform caller-facing error for a failed forward or readiness check.
    pub(crate) fn environment(
        environment: &str,
        method: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Environment {
            environment: environment.to_string(),
            method: method.map(str::to_string),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Wraps any underlying failure so only its message reaches the caller.
    pub(crate) fn wrap_call(environment: &str, method: &str, cause: Error) -> Self {
        let timed_out = cause.is_timeout();
        Error::Environment {
            environment: environment.to_string(),
            method: Some(method.to_string()),
            message: format!("method '{}' failed: {}", method, cause),
            timed_out,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Execution(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Execution(format!("invalid JSON payload: {}", err))
    }
}
