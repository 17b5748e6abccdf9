//! Frequency counters.
//!
//! Relaxed atomics: counters are advisory and never used for control flow.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    EncryptNewSession,
    EncryptExistingSession,
    DecryptNewSession,
    DecryptExistingSession,
    DecryptFailed,
    TagsExpired,
    TagCollisions,
    TagsEvicted,
}

/// Live counters owned by a key manager.
#[derive(Debug, Default)]
pub struct EngineStats {
    encrypt_new_session: AtomicU64,
    encrypt_existing_session: AtomicU64,
    decrypt_new_session: AtomicU64,
    decrypt_existing_session: AtomicU64,
    decrypt_failed: AtomicU64,
    tags_expired: AtomicU64,
    tag_collisions: AtomicU64,
    tags_evicted: AtomicU64,
}

impl EngineStats {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::EncryptNewSession => &self.encrypt_new_session,
            Counter::EncryptExistingSession => &self.encrypt_existing_session,
            Counter::DecryptNewSession => &self.decrypt_new_session,
            Counter::DecryptExistingSession => &self.decrypt_existing_session,
            Counter::DecryptFailed => &self.decrypt_failed,
            Counter::TagsExpired => &self.tags_expired,
            Counter::TagCollisions => &self.tag_collisions,
            Counter::TagsEvicted => &self.tags_evicted,
        }
    }

    pub(crate) fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub(crate) fn add(&self, counter: Counter, n: usize) {
        if n > 0 {
            self.counter(counter).fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter| self.counter(counter).load(Ordering::Relaxed);

        StatsSnapshot {
            encrypt_new_session: load(Counter::EncryptNewSession),
            encrypt_existing_session: load(Counter::EncryptExistingSession),
            decrypt_new_session: load(Counter::DecryptNewSession),
            decrypt_existing_session: load(Counter::DecryptExistingSession),
            decrypt_failed: load(Counter::DecryptFailed),
            tags_expired: load(Counter::TagsExpired),
            tag_collisions: load(Counter::TagCollisions),
            tags_evicted: load(Counter::TagsEvicted),
        }
    }
}

/// Plain copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages sent on the asymmetric path
    pub encrypt_new_session: u64,
    /// Messages sent on the tag path
    pub encrypt_existing_session: u64,
    /// Messages received on the asymmetric path
    pub decrypt_new_session: u64,
    /// Messages received on the tag path
    pub decrypt_existing_session: u64,
    /// Messages that could not be decrypted
    pub decrypt_failed: u64,
    /// Tags dropped by age
    pub tags_expired: u64,
    /// Tags made unknown by a key collision
    pub tag_collisions: u64,
    /// Received tags evicted by table overflow
    pub tags_evicted: u64,
}
