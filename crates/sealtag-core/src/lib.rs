//! Sealtag Core
//!
//! Session-tag bookkeeping for hybrid public-key / symmetric-key message
//! encryption. A sender holding a recipient's long-term public key bootstraps
//! with an asymmetric message that smuggles a batch of single-use random tags
//! bound to a fresh session key. Once the recipient has acknowledged the
//! batch, later messages skip the asymmetric step: the sender prepends an
//! unused tag to a symmetric ciphertext and the recipient finds the key with
//! one table lookup.
//!
//! # Components
//!
//! ```text
//!            encrypt ─────────────┐          ┌──────────── decrypt
//!               │                 ▼          ▼                │
//!               │         SessionRegistry  TagTable ◄─────────┘
//!               │          (per-peer lock)  (striped)
//!               ▼                 ▲          ▲
//!          wire::Frame            └─ sweeper ┘
//! ```
//!
//! - [`Tag`], [`TagSet`]: single-use identifiers and the batches they are
//!   minted in, owned by a generation-stamped [`TagSetArena`]
//! - [`TagTable`]: process-wide tag -> key map with atomic lookup-and-remove
//! - [`SessionRegistry`]: current key, offered next key, PENDING and ACKED
//!   sets per destination
//! - [`KeyManager`]: per-identity context tying the above to the ciphers
//! - [`spawn_sweeper`]: background expiry
//!
//! # Trust boundary
//!
//! Tags a sender mints for its own use enter the tag table only after the
//! peer acknowledges them. Tags that arrive inside a payload that decrypted
//! under our own key are trusted immediately.
//!
//! # Rekey
//!
//! A rotated key rides along with a batch as the offered next key. The
//! current key only changes when a batch bound to the next key is acked, so
//! sender and receiver never disagree about which key is live.

#![forbid(unsafe_code)]

pub mod config;
pub mod decrypt;
pub mod encrypt;
pub mod env;
pub mod error;
pub mod manager;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod sweeper;
pub mod system_env;
pub mod tag;
pub mod tag_set;
pub mod tag_table;
pub mod wire;

#[cfg(test)]
mod test_env;

pub use config::KeyManagerConfig;
pub use decrypt::Decrypted;
pub use encrypt::{DeliveredTags, DeliveryPath, Encrypted};
pub use env::Environment;
pub use error::{ConfigError, SessionError};
pub use manager::KeyManager;
pub use session::{AckOutcome, SendState, SessionRegistry};
pub use snapshot::{InboundSetSnapshot, ManagerSnapshot, SessionSnapshot, TagSetSnapshot};
pub use stats::StatsSnapshot;
pub use sweeper::{SweepReport, spawn_sweeper};
pub use system_env::SystemEnv;
pub use tag::{TAG_SIZE, Tag, mint_tags};
pub use tag_set::{TagSet, TagSetArena, TagSetHandle, TagSetState};
pub use tag_table::{TableCensus, TagTable};
pub use wire::{Frame, WireError};
