//! Error types for cipher primitives

use thiserror::Error;

/// Errors from the symmetric and asymmetric primitives.
///
/// Variants describe what the primitive rejected. Callers at the session layer
/// collapse them into coarser outcomes so that remote peers cannot tell the
/// causes apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Length that was supplied
        actual: usize,
    },

    /// Public key is a low-order point or otherwise unusable
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Symmetric ciphertext is empty or not a multiple of the block size
    #[error("misaligned ciphertext: {len} bytes is not a positive multiple of {block}")]
    MisalignedCiphertext {
        /// Ciphertext length
        len: usize,
        /// Cipher block size
        block: usize,
    },

    /// Block padding did not validate after decryption
    #[error("bad padding")]
    BadPadding,

    /// Asymmetric ciphertext shorter than its fixed header
    #[error("ciphertext too short: {len} bytes, need at least {min}")]
    CiphertextTooShort {
        /// Ciphertext length
        len: usize,
        /// Minimum acceptable length
        min: usize,
    },

    /// AEAD authentication failed (tampering or wrong recipient)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// An underlying primitive rejected well-formed input
    #[error("{0} failed")]
    PrimitiveFailure(&'static str),
}

impl CryptoError {
    /// Returns true if the error was caused by a bad key argument rather than
    /// by the data being processed.
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::InvalidKeyLength { .. } | Self::InvalidPublicKey)
    }
}
