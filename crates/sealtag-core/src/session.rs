//! Outbound session registry.
//!
//! One [`OutboundSession`] per destination public key, each behind its own
//! `parking_lot::Mutex` so that traffic to different destinations never
//! contends. The registry map itself is an `RwLock` that is only written when a
//! session is created; every other operation clones the session's `Arc` under
//! the read lock and releases it before locking the session.
//!
//! # Lock order
//!
//! registry (briefly) -> session -> tag table stripe. Nothing takes a session
//! lock while holding a stripe lock, and a session lock is never held while
//! taking another session's lock: collision fix-ups for other sessions are
//! collected and applied after the first lock is released.
//!
//! # Cross-structure invariant
//!
//! A tag is in the tag table (as an outbound entry) exactly when it is in an
//! ACKED set. Every transition that changes one side changes the other under
//! the same session lock:
//!
//! - ack: tags are inserted, then the set is marked ACKED
//! - consume: tag leaves the table, then the set
//! - fail / expire / promotion cleanup: tags leave the table, then the set is
//!   dropped

use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    ops::Sub,
    sync::Arc,
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use sealtag_crypto::{PublicKey, SessionKey};

use crate::{
    config::KeyManagerConfig,
    env::elapsed,
    error::SessionError,
    snapshot::{SessionSnapshot, TagSetSnapshot},
    tag::Tag,
    tag_set::{TagSet, TagSetArena, TagSetHandle, TagSetState},
    tag_table::{InsertOutcome, TagEntry, TagOrigin, TagTable},
};

/// Tag whose table entry was lost to a collision while another session was
/// locked. Applied once that lock is released.
type Orphan = (PublicKey, TagSetHandle, Tag);

/// What an ack did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Set moved to ACKED and its tags entered the tag table
    Acked {
        /// The set was bound to the offered next key, which is now current
        promoted: bool,
        /// Tags dropped because they collided with an existing entry
        collisions: usize,
    },
    /// Stale handle, key mismatch or repeated ack. Nothing changed.
    Ignored,
}

/// Everything the encryption engine needs to decide whether to mint.
#[derive(Debug, Clone)]
pub struct SendState {
    /// Current key
    pub current: SessionKey,
    /// Offered next key
    pub next: Option<SessionKey>,
    /// A PENDING set bound to the next key is in flight
    pub next_in_flight: bool,
    /// Age of the current key
    pub key_age: Duration,
    /// ACKED tags under the current key
    pub available: usize,
    /// Tags in PENDING sets under the current key
    pub in_flight: usize,
}

/// Result of sweeping one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSweep {
    /// PENDING sets discarded for missing their ack
    pub pending_discarded: usize,
    /// ACKED sets discarded by age
    pub acked_expired: usize,
    /// Tags removed from the table
    pub tags_removed: usize,
}

/// Keys retired by promotion that a late delivery may still name.
const RETIRED_KEY_HISTORY: usize = 4;

/// Per-destination state.
#[derive(Debug)]
pub struct OutboundSession<I> {
    target: PublicKey,
    current_key: SessionKey,
    key_created_at: I,
    next_key: Option<SessionKey>,
    retired: VecDeque<SessionKey>,
    sets: TagSetArena<I>,
    pending: Vec<TagSetHandle>,
    acked: VecDeque<TagSetHandle>,
}

type SharedSession<I> = Arc<Mutex<OutboundSession<I>>>;

impl<I> OutboundSession<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn new(target: PublicKey, current_key: SessionKey, now: I) -> Self {
        Self {
            target,
            current_key,
            key_created_at: now,
            next_key: None,
            retired: VecDeque::new(),
            sets: TagSetArena::new(),
            pending: Vec::new(),
            acked: VecDeque::new(),
        }
    }

    /// ACKED tags under `key` in sets still within `lifetime`.
    fn available(&self, key: &SessionKey, now: I, lifetime: Duration) -> usize {
        self.acked
            .iter()
            .filter_map(|h| self.sets.get(*h))
            .filter(|set| set.key() == key && set.age(now) <= lifetime)
            .map(TagSet::len)
            .sum()
    }

    fn send_state(&self, now: I, lifetime: Duration) -> SendState {
        let mut in_flight = 0;
        let mut next_in_flight = false;
        for set in self.pending.iter().filter_map(|h| self.sets.get(*h)) {
            if set.key() == &self.current_key {
                in_flight += set.len();
            } else if self.next_key.as_ref() == Some(set.key()) {
                next_in_flight = true;
            }
        }

        SendState {
            current: self.current_key.clone(),
            next: self.next_key.clone(),
            next_in_flight,
            key_age: elapsed(now, self.key_created_at),
            available: self.available(&self.current_key, now, lifetime),
            in_flight,
        }
    }

    /// Pop one tag from the oldest live ACKED set under `key`.
    ///
    /// The table removal is the commit point: a tag whose entry is already
    /// gone (consumed by a loopback decrypt or lost to a collision) is
    /// skipped. Sets past `lifetime` are left for the sweeper.
    fn consume(
        &mut self,
        key: &SessionKey,
        now: I,
        lifetime: Duration,
        table: &TagTable<I>,
    ) -> Option<Tag> {
        let mut index = 0;
        while let Some(&handle) = self.acked.get(index) {
            let Some(set) = self.sets.get_mut(handle) else {
                self.acked.remove(index);
                continue;
            };
            if set.key() != key || set.age(now) > lifetime {
                index += 1;
                continue;
            }

            while let Some(tag) = set.pop_tag() {
                if table.remove_owned(&tag, &self.target, handle) {
                    if set.is_empty() {
                        self.sets.remove(handle);
                        self.acked.remove(index);
                    }
                    return Some(tag);
                }
            }

            self.sets.remove(handle);
            self.acked.remove(index);
        }
        None
    }

    fn deliver(
        &mut self,
        key: SessionKey,
        tags: Vec<Tag>,
        now: I,
    ) -> Result<TagSetHandle, SessionError> {
        if self.retired.contains(&key) {
            tracing::debug!(
                peer = %self.target,
                key = %key.fingerprint(),
                "delivery under retired key"
            );
            return Err(SessionError::RetiredKey { target: self.target });
        }

        if key != self.current_key && self.next_key.as_ref() != Some(&key) {
            match self.next_key.replace(key.clone()) {
                Some(superseded) => {
                    let dropped = self.drop_pending_under(&superseded);
                    tracing::info!(
                        peer = %self.target,
                        next = %key.fingerprint(),
                        dropped_sets = dropped,
                        "replacing outstanding next key offer"
                    );
                },
                None => {
                    tracing::info!(
                        peer = %self.target,
                        next = %key.fingerprint(),
                        "offering next key"
                    );
                },
            }
        }

        let count = tags.len();
        let handle = self.sets.insert(TagSet::new(key, tags, now));
        self.pending.push(handle);

        tracing::debug!(peer = %self.target, tags = count, "tags delivered");
        Ok(handle)
    }

    fn drop_pending_under(&mut self, key: &SessionKey) -> usize {
        let doomed: Vec<TagSetHandle> = self
            .pending
            .iter()
            .copied()
            .filter(|h| self.sets.get(*h).is_some_and(|set| set.key() == key))
            .collect();

        for handle in &doomed {
            self.sets.remove(*handle);
        }
        self.pending.retain(|h| !doomed.contains(h));
        doomed.len()
    }

    fn ack(
        &mut self,
        key: &SessionKey,
        handle: TagSetHandle,
        now: I,
        table: &TagTable<I>,
        orphans: &mut Vec<Orphan>,
    ) -> AckOutcome {
        let Some(set) = self.sets.get(handle) else {
            tracing::debug!(peer = %self.target, "ack for unknown tag set");
            return AckOutcome::Ignored;
        };
        if set.key() != key || set.is_acked() {
            tracing::debug!(peer = %self.target, "ack does not match a pending tag set");
            return AckOutcome::Ignored;
        }

        let promoted = self.next_key.as_ref() == Some(key);
        if !promoted && *key != self.current_key {
            return AckOutcome::Ignored;
        }

        let tags = set.tags().to_vec();
        let mut lost = Vec::new();
        let mut collisions = 0;

        for tag in tags {
            let entry = TagEntry {
                key: key.clone(),
                origin: TagOrigin::Outbound { target: self.target, handle },
            };
            match table.insert(tag, entry) {
                InsertOutcome::Inserted => {},
                InsertOutcome::Duplicate | InsertOutcome::Revoked => lost.push(tag),
                InsertOutcome::Collision(evicted) => {
                    collisions += 1;
                    lost.push(tag);
                    if let TagOrigin::Outbound { target, handle: owner } = evicted.origin {
                        if target == self.target {
                            self.forget(owner, &tag);
                        } else {
                            orphans.push((target, owner, tag));
                        }
                    }
                },
            }
        }

        if collisions > 0 {
            tracing::warn!(peer = %self.target, collisions, "tag collision on ack");
        }

        self.pending.retain(|h| *h != handle);
        if let Some(set) = self.sets.get_mut(handle) {
            for tag in &lost {
                set.remove_tag(tag);
            }
            set.mark_acked();
            if set.is_empty() {
                self.sets.remove(handle);
            } else {
                self.acked.push_back(handle);
            }
        }

        if promoted {
            self.promote(key.clone(), now, table);
        }

        AckOutcome::Acked { promoted, collisions }
    }

    fn promote(&mut self, key: SessionKey, now: I, table: &TagTable<I>) {
        let old = std::mem::replace(&mut self.current_key, key);
        self.next_key = None;
        self.key_created_at = now;
        if self.retired.len() == RETIRED_KEY_HISTORY {
            self.retired.pop_front();
        }
        self.retired.push_back(old.clone());

        let pending_dropped = self.drop_pending_under(&old);

        let stale: Vec<TagSetHandle> = self
            .acked
            .iter()
            .copied()
            .filter(|h| self.sets.get(*h).is_some_and(|set| set.key() == &old))
            .collect();
        let mut tags_removed = 0;
        for handle in &stale {
            tags_removed += self.discard(*handle, table);
        }

        tracing::info!(
            peer = %self.target,
            current = %self.current_key.fingerprint(),
            retired = %old.fingerprint(),
            pending_dropped,
            tags_removed,
            "session key rotated"
        );
    }

    /// Drop a set, pulling its tags out of the table if it was ACKED. Returns
    /// the number of table entries removed.
    fn discard(&mut self, handle: TagSetHandle, table: &TagTable<I>) -> usize {
        let Some(set) = self.sets.remove(handle) else {
            return 0;
        };

        self.pending.retain(|h| *h != handle);
        self.acked.retain(|h| *h != handle);

        if set.is_acked() {
            set.tags().iter().filter(|tag| table.remove_owned(tag, &self.target, handle)).count()
        } else {
            0
        }
    }

    /// Remove a tag whose table entry is already gone.
    fn forget(&mut self, handle: TagSetHandle, tag: &Tag) {
        let Some(set) = self.sets.get_mut(handle) else {
            return;
        };
        set.remove_tag(tag);
        if set.is_empty() && set.is_acked() {
            self.sets.remove(handle);
            self.acked.retain(|h| *h != handle);
        }
    }

    fn sweep(&mut self, now: I, config: &KeyManagerConfig, table: &TagTable<I>) -> SessionSweep {
        let mut report = SessionSweep::default();

        let overdue: Vec<(TagSetHandle, Duration, usize)> = self
            .pending
            .iter()
            .filter_map(|h| self.sets.get(*h).map(|set| (*h, set.age(now), set.len())))
            .filter(|(_, age, _)| *age > config.pending_ack_timeout)
            .collect();
        for (handle, age, tags) in overdue {
            tracing::warn!(
                peer = %self.target,
                age_secs = age.as_secs(),
                tags,
                "discarding unacknowledged tag set"
            );
            self.discard(handle, table);
            report.pending_discarded += 1;
        }

        let expired: Vec<TagSetHandle> = self
            .acked
            .iter()
            .copied()
            .filter(|h| {
                self.sets.get(*h).is_none_or(|set| set.age(now) > config.outbound_tag_lifetime)
            })
            .collect();
        for handle in expired {
            if self.sets.contains(handle) {
                report.acked_expired += 1;
            }
            report.tags_removed += self.discard(handle, table);
        }

        report
    }

    fn snapshot(&self, now: I, table: &TagTable<I>) -> SessionSnapshot {
        let handles = self.pending.iter().chain(self.acked.iter()).copied();
        let sets = handles
            .filter_map(|handle| self.sets.get(handle).map(|set| (handle, set)))
            .map(|(handle, set)| {
                let in_table = match set.state() {
                    TagSetState::Acked => set
                        .tags()
                        .iter()
                        .filter(|tag| table.is_owned_by(tag, &self.target, handle))
                        .count(),
                    TagSetState::Pending => {
                        set.tags().iter().filter(|tag| table.contains(tag)).count()
                    },
                };
                TagSetSnapshot {
                    handle,
                    state: set.state(),
                    key: set.key().fingerprint(),
                    current_key: set.key() == &self.current_key,
                    tags: set.len(),
                    in_table,
                    age: set.age(now),
                }
            })
            .collect();

        SessionSnapshot {
            target: self.target,
            current_key: self.current_key.fingerprint(),
            next_key: self.next_key.as_ref().map(SessionKey::fingerprint),
            key_age: elapsed(now, self.key_created_at),
            sets,
        }
    }
}

/// Map of destination to session.
#[derive(Debug)]
pub struct SessionRegistry<I> {
    sessions: RwLock<HashMap<PublicKey, SharedSession<I>>>,
}

impl<I> Default for SessionRegistry<I> {
    fn default() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }
}

impl<I> SessionRegistry<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self, target: &PublicKey) -> Option<SharedSession<I>> {
        self.sessions.read().get(target).cloned()
    }

    fn require(&self, target: &PublicKey) -> Result<SharedSession<I>, SessionError> {
        self.session(target).ok_or(SessionError::SessionNotFound { target: *target })
    }

    /// Return the current key for `target`, creating the session with
    /// `fresh_key` if none exists. The flag is true when a session was
    /// created.
    pub fn get_or_create(
        &self,
        target: PublicKey,
        now: I,
        fresh_key: impl FnOnce() -> SessionKey,
    ) -> (SessionKey, bool) {
        if let Some(session) = self.session(&target) {
            return (session.lock().current_key.clone(), false);
        }

        match self.sessions.write().entry(target) {
            Entry::Occupied(entry) => (entry.get().lock().current_key.clone(), false),
            Entry::Vacant(entry) => {
                let key = fresh_key();
                entry.insert(Arc::new(Mutex::new(OutboundSession::new(target, key.clone(), now))));
                (key, true)
            },
        }
    }

    /// Current key for `target`.
    pub fn current_key(&self, target: &PublicKey) -> Option<SessionKey> {
        self.session(target).map(|s| s.lock().current_key.clone())
    }

    /// Offered next key for `target`.
    pub fn next_key(&self, target: &PublicKey) -> Option<SessionKey> {
        self.session(target).and_then(|s| s.lock().next_key.clone())
    }

    /// Returns true if a session exists for `target`.
    pub fn contains(&self, target: &PublicKey) -> bool {
        self.sessions.read().contains_key(target)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destinations with a session.
    pub fn targets(&self) -> Vec<PublicKey> {
        self.sessions.read().keys().copied().collect()
    }

    /// Minting inputs for `target`. Sets older than `lifetime` do not count
    /// as available.
    pub fn send_state(&self, target: &PublicKey, now: I, lifetime: Duration) -> Option<SendState> {
        self.session(target).map(|s| s.lock().send_state(now, lifetime))
    }

    /// Atomically take one ACKED tag under `key`, removing it from its set and
    /// from the table. Sets older than `lifetime` are skipped.
    pub fn consume_next_available_tag(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        now: I,
        lifetime: Duration,
        table: &TagTable<I>,
    ) -> Option<Tag> {
        self.session(target)?.lock().consume(key, now, lifetime, table)
    }

    /// ACKED tags under `key` in sets younger than `lifetime`.
    pub fn available_tags(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        now: I,
        lifetime: Duration,
    ) -> usize {
        self.session(target).map_or(0, |s| s.lock().available(key, now, lifetime))
    }

    /// Time left before the newest ACKED set under `key` expires.
    pub fn available_time_left(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        now: I,
        lifetime: Duration,
    ) -> Option<Duration> {
        let session = self.session(target)?;
        let session = session.lock();

        session
            .acked
            .iter()
            .filter_map(|h| session.sets.get(*h))
            .filter(|set| set.key() == key && !set.is_empty())
            .map(|set| lifetime.saturating_sub(set.age(now)))
            .max()
    }

    /// Record a batch handed to the peer as a PENDING set.
    ///
    /// A key that is neither current nor already offered becomes the offered
    /// next key. A newer offer replaces an older one and drops its PENDING
    /// sets.
    ///
    /// # Errors
    ///
    /// - `SessionError::SessionNotFound` if `target` has no session
    /// - `SessionError::RetiredKey` if a promotion already retired `key`
    pub fn tags_delivered(
        &self,
        target: &PublicKey,
        key: SessionKey,
        tags: Vec<Tag>,
        now: I,
    ) -> Result<TagSetHandle, SessionError> {
        let session = self.require(target)?;
        let handle = session.lock().deliver(key, tags, now)?;
        Ok(handle)
    }

    /// Record a batch that was planned while `planned_current` was the current
    /// key.
    ///
    /// If a promotion happened since, the plan is stale: a batch under any key
    /// other than the new current one is dropped and `None` is returned.
    ///
    /// # Errors
    ///
    /// `SessionError::SessionNotFound` if `target` has no session.
    pub fn deliver_planned(
        &self,
        target: &PublicKey,
        planned_current: &SessionKey,
        key: SessionKey,
        tags: Vec<Tag>,
        now: I,
    ) -> Result<Option<TagSetHandle>, SessionError> {
        let session = self.require(target)?;
        let mut session = session.lock();

        if &session.current_key != planned_current && key != session.current_key {
            tracing::debug!(peer = %target, "dropping batch planned before a key rotation");
            return Ok(None);
        }
        session.deliver(key, tags, now).map(Some)
    }

    /// Move a PENDING set to ACKED and publish its tags.
    ///
    /// Acking a set under the offered next key promotes it to current and
    /// retires every set bound to the old key.
    ///
    /// # Errors
    ///
    /// `SessionError::SessionNotFound` if `target` has no session. Stale
    /// handles are not an error.
    pub fn tags_acked(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        handle: TagSetHandle,
        now: I,
        table: &TagTable<I>,
    ) -> Result<AckOutcome, SessionError> {
        let session = self.require(target)?;

        let mut orphans = Vec::new();
        let outcome = session.lock().ack(key, handle, now, table, &mut orphans);
        self.release_orphans(orphans);

        Ok(outcome)
    }

    /// Drop a set after the peer reported it lost. Returns true if a set was
    /// removed.
    ///
    /// # Errors
    ///
    /// `SessionError::SessionNotFound` if `target` has no session.
    pub fn fail_tags(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        handle: TagSetHandle,
        table: &TagTable<I>,
    ) -> Result<bool, SessionError> {
        let session = self.require(target)?;
        let mut session = session.lock();

        if !session.sets.get(handle).is_some_and(|set| set.key() == key) {
            return Ok(false);
        }

        let removed = session.discard(handle, table);
        tracing::debug!(peer = %target, tags_removed = removed, "tag set failed");
        Ok(true)
    }

    /// Remove a tag from its owning set after its table entry was consumed
    /// elsewhere.
    pub fn forget_tag(&self, target: &PublicKey, handle: TagSetHandle, tag: &Tag) {
        if let Some(session) = self.session(target) {
            session.lock().forget(handle, tag);
        }
    }

    fn release_orphans(&self, orphans: Vec<Orphan>) {
        for (target, handle, tag) in orphans {
            self.forget_tag(&target, handle, &tag);
        }
    }

    /// Sweep sessions in bursts of `config.sweep_batch_size`, yielding the
    /// thread between bursts.
    pub fn sweep(&self, now: I, config: &KeyManagerConfig, table: &TagTable<I>) -> SessionSweep {
        let sessions: Vec<SharedSession<I>> = self.sessions.read().values().cloned().collect();
        let mut total = SessionSweep::default();

        for (burst, chunk) in sessions.chunks(config.sweep_batch_size).enumerate() {
            if burst > 0 {
                std::thread::yield_now();
            }
            for session in chunk {
                let report = session.lock().sweep(now, config, table);
                total.pending_discarded += report.pending_discarded;
                total.acked_expired += report.acked_expired;
                total.tags_removed += report.tags_removed;
            }
        }

        total
    }

    /// Per-session status, ordered by destination.
    pub fn snapshot(&self, now: I, table: &TagTable<I>) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SharedSession<I>> =
            self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.lock().target);
        sessions.iter().map(|s| s.lock().snapshot(now, table)).collect()
    }
}
