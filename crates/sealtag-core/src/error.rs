//! Error types for the session layer.
//!
//! Public operations return [`SessionError`]. Its variants are deliberately
//! coarse: the decryption engine collapses every failure into
//! `UndecryptableMessage` so a remote peer cannot learn why a message was
//! dropped.

use std::time::Duration;

use sealtag_crypto::{CryptoError, PublicKey};
use thiserror::Error;

use crate::wire::WireError;

/// Errors returned by key manager operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Malformed key argument, rejected before any state was touched
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What was wrong with the key
        reason: String,
    },

    /// The symmetric or asymmetric primitive rejected its input
    #[error("cipher failure: {reason}")]
    CipherFailure {
        /// Primitive or codec failure description
        reason: String,
    },

    /// Neither tag lookup nor asymmetric decryption produced a message
    #[error("undecryptable message")]
    UndecryptableMessage,

    /// Operation referenced a destination with no session
    #[error("no session for {target}")]
    SessionNotFound {
        /// Destination that has no registry entry
        target: PublicKey,
    },

    /// Tags were delivered under a key a promotion already retired
    #[error("key for {target} was retired by a rotation")]
    RetiredKey {
        /// Destination whose session rotated
        target: PublicKey,
    },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Returns true for outcomes that are expected network noise.
    ///
    /// Undecryptable messages come from stale tags, foreign traffic and
    /// probing. They are dropped and logged at low severity. Every other
    /// variant points at a caller or configuration mistake.
    pub fn is_routine(&self) -> bool {
        matches!(self, Self::UndecryptableMessage)
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        if err.is_key_error() {
            Self::InvalidKey { reason: err.to_string() }
        } else {
            Self::CipherFailure { reason: err.to_string() }
        }
    }
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        Self::CipherFailure { reason: err.to_string() }
    }
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Batch size outside 1..=max
    #[error("tag batch size {size} outside 1..={max}")]
    InvalidBatchSize {
        /// Configured size
        size: usize,
        /// Largest size a frame can carry
        max: usize,
    },

    /// A timeout, lifetime or interval is zero
    #[error("{field} must be non-zero")]
    ZeroDuration {
        /// Offending field
        field: &'static str,
    },

    /// Received tags would expire while the sender may still use them
    #[error("inbound tag lifetime {inbound:?} shorter than outbound lifetime {outbound:?}")]
    InboundLifetimeTooShort {
        /// Configured inbound lifetime
        inbound: Duration,
        /// Configured outbound lifetime
        outbound: Duration,
    },

    /// A capacity or count is zero
    #[error("{field} must be non-zero")]
    ZeroCapacity {
        /// Offending field
        field: &'static str,
    },
}
