//! CSI error types.
//!
//! Every failure in `libmanila` is a [`CsiError`]. The enum derives
//! [`thiserror::Error`] and [`Serialize`]/[`Deserialize`] so that the exact
//! failure class reported by Manila or Keystone travels back to the caller
//! across the QUIC transport unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// Neither the cloud-config file nor the environment yielded usable
    /// credentials.
    #[error("cannot resolve cloud credentials: {0}")]
    ConfigResolution(String),

    /// The identity handshake failed, or the backend rejected the token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The requested share does not exist on the backend.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The storage backend rejected an operation.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested capacity cannot be satisfied within the caller's limit.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The operation is not supported by this plugin.
    #[error("{0} is not implemented")]
    Unimplemented(String),

    /// The caller's deadline elapsed before the backend answered.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// `true` when the error means "the share is absent" rather than "the
    /// lookup itself failed".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::VolumeNotFound(_))
    }
}
