//! Status snapshot of a key manager.
//!
//! Plain data for status pages and test invariants. Keys appear only as
//! fingerprints. Each session is captured under its own lock, so a snapshot is
//! consistent per session but not across sessions.

use std::time::Duration;

use sealtag_crypto::PublicKey;

use crate::{
    stats::StatsSnapshot,
    tag_set::{TagSetHandle, TagSetState},
    tag_table::TableCensus,
};

/// One outbound tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSetSnapshot {
    /// Handle in the session's arena
    pub handle: TagSetHandle,
    /// Ack state
    pub state: TagSetState,
    /// Fingerprint of the set's key
    pub key: String,
    /// Set is bound to the current key
    pub current_key: bool,
    /// Remaining tags
    pub tags: usize,
    /// Remaining tags present in the tag table (owned by this set when
    /// ACKED, under any owner when PENDING)
    pub in_table: usize,
    /// Time since creation
    pub age: Duration,
}

/// One outbound session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Destination
    pub target: PublicKey,
    /// Fingerprint of the current key
    pub current_key: String,
    /// Fingerprint of the offered next key
    pub next_key: Option<String>,
    /// Age of the current key
    pub key_age: Duration,
    /// Pending and acked sets
    pub sets: Vec<TagSetSnapshot>,
}

impl SessionSnapshot {
    /// Acked tags under the current key.
    pub fn available(&self) -> usize {
        self.sets
            .iter()
            .filter(|s| s.state == TagSetState::Acked && s.current_key)
            .map(|s| s.tags)
            .sum()
    }

    /// Tags waiting for an ack.
    pub fn pending(&self) -> usize {
        self.sets.iter().filter(|s| s.state == TagSetState::Pending).map(|s| s.tags).sum()
    }
}

/// One received tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSetSnapshot {
    /// Table-unique id
    pub id: u64,
    /// Fingerprint of the key the tags map to
    pub key: String,
    /// Tags the frame carried
    pub size: usize,
    /// Tags still in the table
    pub remaining: usize,
    /// Time since receipt
    pub age: Duration,
}

/// Whole-manager status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSnapshot {
    /// Outbound sessions, ordered by destination
    pub sessions: Vec<SessionSnapshot>,
    /// Received sets with tags still in the table, oldest first
    pub inbound: Vec<InboundSetSnapshot>,
    /// Table entries by origin
    pub census: TableCensus,
    /// Table length counter
    pub table_len: usize,
    /// Counters
    pub stats: StatsSnapshot,
}

impl ManagerSnapshot {
    /// Remaining tags across all ACKED outbound sets.
    pub fn acked_tags(&self) -> usize {
        self.sessions
            .iter()
            .flat_map(|s| &s.sets)
            .filter(|s| s.state == TagSetState::Acked)
            .map(|s| s.tags)
            .sum()
    }

    /// Remaining tags across all received sets.
    pub fn inbound_tags(&self) -> usize {
        self.inbound.iter().map(|s| s.remaining).sum()
    }

    /// Session for `target`.
    pub fn session(&self, target: &PublicKey) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| &s.target == target)
    }
}
