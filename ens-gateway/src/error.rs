//! Unified error types for the gateway.
//!
//! Every failure a request can hit maps onto an HTTP status through
//! [`Error::status`]:
//! - [`Error::NotImplemented`] (404): no handler for the selector
//! - [`Error::MalformedRequest`] (400): bad sender, calldata or ABI payload
//! - [`Error::Unauthorized`] (401): write authorization or ownership failed
//! - [`Error::Application`] (handler-declared, usually 400)
//! - [`Error::Internal`] / [`Error::Signing`] (500)

use alloy::primitives::Selector;

use crate::repository::RepositoryError;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the gateway.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No handler is registered for the requested selector.
    #[error("function {selector} is not implemented by this gateway")]
    NotImplemented {
        /// The 4-byte selector that was requested.
        selector: Selector,
    },

    /// The request could not be parsed (transport shape or ABI payload).
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The interface description could not be parsed.
    #[error("malformed interface: {0}")]
    MalformedInterface(String),

    /// Write authorization or ownership validation failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Business failure declared by a handler; surfaced verbatim.
    #[error("{message}")]
    Application {
        /// HTTP status to respond with.
        status: u16,
        /// Message returned to the caller.
        message: String,
    },

    /// Storage collaborator failure.
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// Response signing or fingerprinting failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Unexpected failure outside the handler contract.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a malformed request error.
    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create an unauthorized error.
    #[must_use]
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an application error with the default 400 status.
    #[must_use]
    pub fn application(msg: impl Into<String>) -> Self {
        Self::Application {
            status: 400,
            message: msg.into(),
        }
    }

    /// Create an application error with an explicit status.
    #[must_use]
    pub fn application_with_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Application {
            status,
            message: msg.into(),
        }
    }

    /// Create a signing error.
    #[must_use]
    pub fn signing(msg: impl Into<String>) -> Self {
        Self::Signing(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code this error is reported with.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::NotImplemented { .. } => 404,
            Self::MalformedRequest(_) | Self::Repository(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Application { status, .. } => *status,
            Self::MalformedInterface(_) | Self::Signing(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether a retry could succeed without changing the request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_) | Self::Signing(_))
    }
}

impl From<alloy::dyn_abi::Error> for Error {
    fn from(e: alloy::dyn_abi::Error) -> Self {
        Self::MalformedRequest(format!("ABI decoding failed: {e}"))
    }
}
