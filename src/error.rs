//! Error types for portgate.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// A forwarding request did not carry enough information to build a
    /// complete route. This is a caller/config mistake, never swallowed.
    #[error("invalid route: {message}")]
    InvalidRoute { message: String },

    /// A service operation was attempted in the wrong lifecycle state.
    #[error("invalid service state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// The underlying byte stream could not be established.
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// A recognized instruction arrived with missing or mistyped fields.
    /// Contained inside the dispatcher; never crosses the transport boundary.
    #[error("malformed instruction: {message}")]
    MalformedInstruction { message: String },

    /// Two service definitions share a name or a local port.
    #[error("duplicate service: {message}")]
    DuplicateService { message: String },

    /// Agent configuration could not be loaded or validated.
    #[error("config error: {message}")]
    Config { message: String },

    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_route(message: impl Into<String>) -> Self {
        Error::InvalidRoute {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedInstruction {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
