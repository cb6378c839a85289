//! Error types for Keyflow.

use thiserror::Error as ThisError;

/// Result type alias for Keyflow operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types raised by change-set propagation.
///
/// Errors are `Clone` because a terminal error is fanned out to every
/// subscriber of a stream.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Malformed construction input.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
    /// A change referenced a key the mirror does not hold.
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
    /// The source stream terminated with an error.
    #[error("Upstream failure: {message}")]
    UpstreamFailure { message: String },
    /// A caller-supplied callback (release action, grouping function) failed.
    #[error("Callback failure: {message}")]
    CallbackFailure { message: String },
}

impl Error {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an upstream failure error.
    pub fn upstream_failure(message: impl Into<String>) -> Self {
        Error::UpstreamFailure {
            message: message.into(),
        }
    }

    /// Creates a callback failure error.
    pub fn callback_failure(message: impl Into<String>) -> Self {
        Error::CallbackFailure {
            message: message.into(),
        }
    }

    /// Returns true if this error ends a stream because of a user callback.
    #[inline]
    pub fn is_callback_failure(&self) -> bool {
        matches!(self, Error::CallbackFailure { .. })
    }
}
