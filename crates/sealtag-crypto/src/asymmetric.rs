//! Asymmetric layer used to bootstrap a session.
//!
//! The default sealed box performs an ephemeral X25519 agreement with the
//! recipient's long-term key, derives a one-time AEAD key with HKDF-SHA256 and
//! seals the plaintext with XChaCha20-Poly1305.
//!
//! ```text
//! ephemeral_public (32) || nonce (24) || ciphertext || poly1305 tag (16)
//! ```
//!
//! Both public keys are bound into the HKDF salt so a ciphertext cannot be
//! replayed toward a different recipient.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keys::{ASYM_KEY_SIZE, KeyPair, PrivateKey, PublicKey},
};

/// Nonce size for XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
const POLY1305_TAG_SIZE: usize = 16;

/// Random bytes consumed by one asymmetric encryption: ephemeral secret
/// followed by the AEAD nonce.
pub const ASYM_RANDOMNESS_SIZE: usize = ASYM_KEY_SIZE + NONCE_SIZE;

/// Fixed bytes a sealed box adds on top of the plaintext.
pub const SEALED_BOX_OVERHEAD: usize = ASYM_KEY_SIZE + NONCE_SIZE + POLY1305_TAG_SIZE;

/// Label used for sealed box key derivation
const SEALED_BOX_LABEL: &[u8] = b"sealtagSealedBoxV1";

/// Fixed scalar used to probe public keys for low-order points.
const PROBE_SCALAR: [u8; ASYM_KEY_SIZE] = [0x5A; ASYM_KEY_SIZE];

/// Public-key encryption to a destination's long-term key.
pub trait AsymmetricCipher: Send + Sync + 'static {
    /// Reject public keys this cipher cannot encrypt to.
    fn check_public_key(&self, key: &PublicKey) -> Result<(), CryptoError>;

    /// Derive a key pair from 32 bytes of secret randomness.
    fn derive_keypair(&self, secret: [u8; ASYM_KEY_SIZE]) -> KeyPair;

    /// Encrypt `plaintext` so only the holder of `recipient`'s private key can
    /// read it. `randomness` MUST be fresh cryptographically secure bytes.
    fn encrypt(
        &self,
        recipient: &PublicKey,
        plaintext: &[u8],
        randomness: &[u8; ASYM_RANDOMNESS_SIZE],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a ciphertext produced by [`AsymmetricCipher::encrypt`].
    fn decrypt(&self, private: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// X25519 + HKDF-SHA256 + XChaCha20-Poly1305 sealed box.
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519SealedBox;

impl X25519SealedBox {
    /// Derive the one-time AEAD key for a sealed box.
    fn derive_box_key(
        shared_secret: &[u8; 32],
        ephemeral_public: &[u8; ASYM_KEY_SIZE],
        recipient_public: &[u8; ASYM_KEY_SIZE],
    ) -> Result<[u8; 32], CryptoError> {
        let mut salt = [0u8; 2 * ASYM_KEY_SIZE];
        salt[..ASYM_KEY_SIZE].copy_from_slice(ephemeral_public);
        salt[ASYM_KEY_SIZE..].copy_from_slice(recipient_public);

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
        let mut okm = [0u8; 32];
        hkdf.expand(SEALED_BOX_LABEL, &mut okm)
            .map_err(|_| CryptoError::PrimitiveFailure("hkdf expand"))?;
        Ok(okm)
    }
}

impl AsymmetricCipher for X25519SealedBox {
    fn check_public_key(&self, key: &PublicKey) -> Result<(), CryptoError> {
        let probe = StaticSecret::from(PROBE_SCALAR);
        let shared = probe.diffie_hellman(&X25519Public::from(*key.as_bytes()));

        if shared.was_contributory() { Ok(()) } else { Err(CryptoError::InvalidPublicKey) }
    }

    fn derive_keypair(&self, secret: [u8; ASYM_KEY_SIZE]) -> KeyPair {
        let secret = StaticSecret::from(secret);
        let public = X25519Public::from(&secret);

        KeyPair {
            public: PublicKey::from_bytes(public.to_bytes()),
            private: PrivateKey::from_bytes(secret.to_bytes()),
        }
    }

    fn encrypt(
        &self,
        recipient: &PublicKey,
        plaintext: &[u8],
        randomness: &[u8; ASYM_RANDOMNESS_SIZE],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut ephemeral_bytes = [0u8; ASYM_KEY_SIZE];
        ephemeral_bytes.copy_from_slice(&randomness[..ASYM_KEY_SIZE]);
        let ephemeral = StaticSecret::from(ephemeral_bytes);
        ephemeral_bytes.zeroize();
        let ephemeral_public = X25519Public::from(&ephemeral);

        let shared = ephemeral.diffie_hellman(&X25519Public::from(*recipient.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }

        let mut box_key = Self::derive_box_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            recipient.as_bytes(),
        )?;
        let cipher = XChaCha20Poly1305::new((&box_key).into());
        box_key.zeroize();

        let nonce = &randomness[ASYM_KEY_SIZE..];
        let sealed = cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::PrimitiveFailure("aead seal"))?;

        let mut out = Vec::with_capacity(SEALED_BOX_OVERHEAD + plaintext.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, private: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < SEALED_BOX_OVERHEAD {
            return Err(CryptoError::CiphertextTooShort {
                len: ciphertext.len(),
                min: SEALED_BOX_OVERHEAD,
            });
        }

        let (ephemeral_bytes, rest) = ciphertext.split_at(ASYM_KEY_SIZE);
        let (nonce, sealed) = rest.split_at(NONCE_SIZE);

        let mut ephemeral_public = [0u8; ASYM_KEY_SIZE];
        ephemeral_public.copy_from_slice(ephemeral_bytes);

        let secret = StaticSecret::from(*private.as_bytes());
        let recipient_public = X25519Public::from(&secret);
        let shared = secret.diffie_hellman(&X25519Public::from(ephemeral_public));
        if !shared.was_contributory() {
            return Err(CryptoError::AuthenticationFailed);
        }

        let mut box_key =
            Self::derive_box_key(shared.as_bytes(), &ephemeral_public, recipient_public.as_bytes())?;
        let cipher = XChaCha20Poly1305::new((&box_key).into());
        box_key.zeroize();

        cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn randomness(byte: u8) -> [u8; ASYM_RANDOMNESS_SIZE] {
        [byte; ASYM_RANDOMNESS_SIZE]
    }

    #[test]
    fn seal_open_roundtrip() {
        let recipient = X25519SealedBox.derive_keypair([0x01; 32]);
        let sealed =
            X25519SealedBox.encrypt(&recipient.public, b"bootstrap", &randomness(0x33)).unwrap();

        assert_eq!(sealed.len(), SEALED_BOX_OVERHEAD + b"bootstrap".len());

        let opened = X25519SealedBox.decrypt(&recipient.private, &sealed).unwrap();
        assert_eq!(opened, b"bootstrap");
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let recipient = X25519SealedBox.derive_keypair([0x01; 32]);
        let other = X25519SealedBox.derive_keypair([0x02; 32]);
        let sealed =
            X25519SealedBox.encrypt(&recipient.public, b"for recipient", &randomness(7)).unwrap();

        let result = X25519SealedBox.decrypt(&other.private, &sealed);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[test]
    fn tampered_box_is_rejected() {
        let recipient = X25519SealedBox.derive_keypair([0x03; 32]);
        let mut sealed =
            X25519SealedBox.encrypt(&recipient.public, b"payload", &randomness(9)).unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(X25519SealedBox.decrypt(&recipient.private, &sealed).is_err());
    }

    #[test]
    fn short_box_is_rejected() {
        let recipient = X25519SealedBox.derive_keypair([0x04; 32]);
        let result = X25519SealedBox.decrypt(&recipient.private, &[0u8; SEALED_BOX_OVERHEAD - 1]);

        assert!(matches!(result, Err(CryptoError::CiphertextTooShort { .. })));
    }

    #[test]
    fn low_order_public_keys_are_rejected() {
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            X25519SealedBox.check_public_key(&zero),
            Err(CryptoError::InvalidPublicKey)
        ));

        // u = 1 is a point of order 4 on Curve25519
        let mut one = [0u8; 32];
        one[0] = 1;
        assert!(X25519SealedBox.check_public_key(&PublicKey::from_bytes(one)).is_err());

        let zero_result = X25519SealedBox.encrypt(&zero, b"x", &randomness(1));
        assert!(matches!(zero_result, Err(CryptoError::InvalidPublicKey)));
    }

    #[test]
    fn derived_public_keys_pass_the_check() {
        let pair = X25519SealedBox.derive_keypair([0x55; 32]);
        assert!(X25519SealedBox.check_public_key(&pair.public).is_ok());
    }

    #[test]
    fn different_randomness_produces_different_boxes() {
        let recipient = X25519SealedBox.derive_keypair([0x06; 32]);
        let a = X25519SealedBox.encrypt(&recipient.public, b"same", &randomness(1)).unwrap();
        let b = X25519SealedBox.encrypt(&recipient.public, b"same", &randomness(2)).unwrap();

        assert_ne!(a, b);
    }
}
