//! Key newtypes shared by the symmetric and asymmetric layers.
//!
//! Secret material (`SessionKey`, `PrivateKey`) is zeroized on drop and never
//! printed. Public keys print as a short hex fingerprint so they can appear in
//! structured logs.

use std::fmt;

use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of a symmetric session key in bytes.
pub const SESSION_KEY_SIZE: usize = 32;

/// Size of an X25519 public or private key in bytes.
pub const ASYM_KEY_SIZE: usize = 32;

/// Size of the explicit IV used by the symmetric layer.
pub const IV_SIZE: usize = 16;

/// Bytes of a key shown in fingerprints.
const FINGERPRINT_BYTES: usize = 4;

/// Explicit initialization vector for the symmetric layer.
pub type Iv = [u8; IV_SIZE];

/// Symmetric key that tags are minted under.
///
/// Equality is constant-time so that comparing a candidate key against a
/// session's current key does not leak how many leading bytes matched.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from a slice, rejecting anything but 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; SESSION_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: SESSION_KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    /// Short non-secret identifier for logs and status output.
    ///
    /// Derived from the key with SHA-256 so it reveals nothing usable.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

/// Long-term public key of a destination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; ASYM_KEY_SIZE]);

impl PublicKey {
    /// Wrap raw public key bytes.
    pub fn from_bytes(bytes: [u8; ASYM_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a public key from a slice, rejecting anything but 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; ASYM_KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength { expected: ASYM_KEY_SIZE, actual: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; ASYM_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..FINGERPRINT_BYTES]))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// Long-term private key of the local identity.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; ASYM_KEY_SIZE]);

impl PrivateKey {
    /// Wrap raw private key bytes.
    pub fn from_bytes(bytes: [u8; ASYM_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw private key bytes.
    pub fn as_bytes(&self) -> &[u8; ASYM_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A public/private key pair for one local identity.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Public half, handed to senders.
    pub public: PublicKey,
    /// Private half, used for the asymmetric fallback on decrypt.
    pub private: PrivateKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_equality_is_by_value() {
        let a = SessionKey::from_bytes([7; SESSION_KEY_SIZE]);
        let b = SessionKey::from_bytes([7; SESSION_KEY_SIZE]);
        let c = SessionKey::from_bytes([8; SESSION_KEY_SIZE]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn session_key_debug_does_not_leak_bytes() {
        let key = SessionKey::from_bytes([0xAB; SESSION_KEY_SIZE]);
        let printed = format!("{key:?}");

        assert!(!printed.contains("abababab"));
        assert!(printed.starts_with("SessionKey("));
    }

    #[test]
    fn try_from_slice_rejects_wrong_length() {
        let result = SessionKey::try_from_slice(&[0u8; 31]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 31 })
        ));

        let result = PublicKey::try_from_slice(&[0u8; 33]);
        assert!(matches!(
            result,
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 33 })
        ));
    }

    #[test]
    fn public_key_display_is_short_fingerprint() {
        let key = PublicKey::from_bytes([0x01; ASYM_KEY_SIZE]);
        assert_eq!(key.to_string(), "01010101");
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let key = PrivateKey::from_bytes([0x42; ASYM_KEY_SIZE]);
        assert_eq!(format!("{key:?}"), "PrivateKey(..)");
    }
}
