//! Sealtag Cryptographic Primitives
//!
//! Key types and the two cipher seams the session layer is built on. Pure
//! functions with deterministic outputs: callers provide random bytes, which
//! keeps every higher layer reproducible under simulation.
//!
//! # Layers
//!
//! ```text
//! Bootstrap (expensive)               Tag path (cheap)
//!
//! AsymmetricCipher                    SymmetricCipher
//!   X25519 ephemeral agreement          AES-256-CBC, explicit IV
//!   HKDF-SHA256                         PKCS#7 block padding
//!   XChaCha20-Poly1305
//! ```
//!
//! The session layer only sees the traits. Swapping either primitive does not
//! touch tag bookkeeping.
//!
//! # Security
//!
//! - `SessionKey` and `PrivateKey` are zeroized on drop and redacted in
//!   `Debug` output
//! - `SessionKey` comparison is constant-time
//! - Low-order X25519 public keys are rejected before any state is created for
//!   them

#![forbid(unsafe_code)]

pub mod asymmetric;
pub mod error;
pub mod keys;
pub mod symmetric;

pub use asymmetric::{
    ASYM_RANDOMNESS_SIZE, AsymmetricCipher, NONCE_SIZE, SEALED_BOX_OVERHEAD, X25519SealedBox,
};
pub use error::CryptoError;
pub use keys::{
    ASYM_KEY_SIZE, IV_SIZE, Iv, KeyPair, PrivateKey, PublicKey, SESSION_KEY_SIZE, SessionKey,
};
pub use symmetric::{Aes256Cbc, BLOCK_SIZE, SymmetricCipher};
