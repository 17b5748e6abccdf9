//! Striped concurrent map from tag to key.
//!
//! Every inbound message probes the table, so it is split into power-of-two
//! stripes, each behind its own `parking_lot::Mutex`. A lookup touches exactly
//! one stripe; unrelated peers only contend when their tags land in the same
//! stripe.
//!
//! # Lock order
//!
//! Stripe locks are always innermost. Callers may hold a session lock while
//! touching the table; the table never calls back out while a stripe is
//! locked.

use std::{
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use sealtag_crypto::{PublicKey, SessionKey};

use crate::{tag::Tag, tag_set::TagSetHandle};

/// Tags received from a peer in one frame.
///
/// Entries in the table share this record, which lets the sweeper expire and
/// evict received sets as a unit.
#[derive(Debug)]
pub struct InboundTagSet<I> {
    id: u64,
    key: SessionKey,
    created_at: I,
    size: usize,
    remaining: AtomicUsize,
    revoked: AtomicBool,
}

impl<I: Copy> InboundTagSet<I> {
    /// Table-unique identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Key the tags decrypt under.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// When the set was received.
    pub fn created_at(&self) -> I {
        self.created_at
    }

    /// Tags the frame carried.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tags of this set still in the table.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Returns true once the set was condemned by a collision. A revoked set
    /// never gains entries again.
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }
}

/// Who a table entry belongs to.
#[derive(Debug, Clone)]
pub enum TagOrigin<I> {
    /// Our own acked tag for messages to `target`
    Outbound {
        /// Destination session
        target: PublicKey,
        /// Owning set in that session's arena
        handle: TagSetHandle,
    },
    /// Tag a peer gave us
    Inbound(Arc<InboundTagSet<I>>),
}

/// Value stored per tag.
#[derive(Debug, Clone)]
pub struct TagEntry<I> {
    /// Key the tag maps to
    pub key: SessionKey,
    /// Owner of the tag
    pub origin: TagOrigin<I>,
}

/// Result of [`TagTable::insert`].
#[derive(Debug)]
pub enum InsertOutcome<I> {
    /// Tag was new
    Inserted,
    /// Tag already present under the same key; nothing changed
    Duplicate,
    /// Tag already present under another key. The old entry was removed and
    /// the new one was not inserted, so the tag is now unknown.
    Collision(TagEntry<I>),
    /// The entry's received set was revoked; nothing changed
    Revoked,
}

/// Entry counts by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCensus {
    /// Outbound (acked) entries
    pub outbound: usize,
    /// Inbound (received) entries
    pub inbound: usize,
}

type Stripe<I> = Mutex<HashMap<Tag, TagEntry<I>>>;

/// Concurrent tag table.
#[derive(Debug)]
pub struct TagTable<I> {
    stripes: Box<[Stripe<I>]>,
    mask: usize,
    len: AtomicUsize,
    inbound: AtomicUsize,
    next_inbound_id: AtomicU64,
}

impl<I: Copy> TagTable<I> {
    /// Table with `stripes` stripes, rounded up to a power of two.
    pub fn new(stripes: usize) -> Self {
        let count = stripes.max(1).next_power_of_two();
        let stripes = (0..count).map(|_| Mutex::new(HashMap::new())).collect();

        Self {
            stripes,
            mask: count - 1,
            len: AtomicUsize::new(0),
            inbound: AtomicUsize::new(0),
            next_inbound_id: AtomicU64::new(0),
        }
    }

    fn stripe(&self, tag: &Tag) -> &Stripe<I> {
        &self.stripes[tag.stripe(self.mask)]
    }

    /// Create the shared record for a batch of received tags.
    pub fn new_inbound_set(
        &self,
        key: SessionKey,
        created_at: I,
        size: usize,
    ) -> Arc<InboundTagSet<I>> {
        let id = self.next_inbound_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(InboundTagSet {
            id,
            key,
            created_at,
            size,
            remaining: AtomicUsize::new(0),
            revoked: AtomicBool::new(false),
        })
    }

    /// Insert a mapping.
    ///
    /// A tag already present under a different key is treated as unknown from
    /// then on: the existing entry is removed and returned, and the new entry
    /// is dropped. Entries of a revoked received set are refused.
    pub fn insert(&self, tag: Tag, entry: TagEntry<I>) -> InsertOutcome<I> {
        let mut stripe = self.stripe(&tag).lock();

        if let TagOrigin::Inbound(set) = &entry.origin
            && set.is_revoked()
        {
            return InsertOutcome::Revoked;
        }

        match stripe.entry(tag) {
            Entry::Occupied(existing) if existing.get().key == entry.key => {
                InsertOutcome::Duplicate
            },
            Entry::Occupied(existing) => {
                let evicted = existing.remove();
                self.note_removed(&evicted);
                InsertOutcome::Collision(evicted)
            },
            Entry::Vacant(slot) => {
                if let TagOrigin::Inbound(set) = &entry.origin {
                    set.remaining.fetch_add(1, Ordering::AcqRel);
                    self.inbound.fetch_add(1, Ordering::AcqRel);
                }
                slot.insert(entry);
                self.len.fetch_add(1, Ordering::AcqRel);
                InsertOutcome::Inserted
            },
        }
    }

    /// Atomically look up and remove `tag`.
    pub fn lookup_and_remove(&self, tag: &Tag) -> Option<TagEntry<I>> {
        let entry = self.stripe(tag).lock().remove(tag)?;
        self.note_removed(&entry);
        Some(entry)
    }

    /// Remove `tag` only if it is an outbound entry owned by `handle` in the
    /// session for `target`.
    ///
    /// Returns false if the tag was already consumed or belongs to someone
    /// else.
    pub fn remove_owned(&self, tag: &Tag, target: &PublicKey, handle: TagSetHandle) -> bool {
        let mut stripe = self.stripe(tag).lock();

        let owned = matches!(
            stripe.get(tag),
            Some(TagEntry { origin: TagOrigin::Outbound { target: t, handle: h }, .. })
                if t == target && *h == handle
        );
        if owned {
            stripe.remove(tag);
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        owned
    }

    /// Returns true if `tag` is present.
    pub fn contains(&self, tag: &Tag) -> bool {
        self.stripe(tag).lock().contains_key(tag)
    }

    /// Returns true if `tag` is present as an outbound entry owned by
    /// `handle` in the session for `target`.
    pub fn is_owned_by(&self, tag: &Tag, target: &PublicKey, handle: TagSetHandle) -> bool {
        matches!(
            self.stripe(tag).lock().get(tag),
            Some(TagEntry { origin: TagOrigin::Outbound { target: t, handle: h }, .. })
                if t == target && *h == handle
        )
    }

    /// Total entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Drop every entry of stripe `index` for which `keep` returns false.
    ///
    /// Holds only that stripe's lock. Returns the removed entries.
    pub fn retain_stripe(
        &self,
        index: usize,
        mut keep: impl FnMut(&Tag, &TagEntry<I>) -> bool,
    ) -> Vec<(Tag, TagEntry<I>)> {
        let Some(stripe) = self.stripes.get(index) else {
            return Vec::new();
        };
        let mut stripe = stripe.lock();

        let doomed: Vec<Tag> =
            stripe.iter().filter(|(tag, entry)| !keep(tag, entry)).map(|(tag, _)| *tag).collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for tag in doomed {
            if let Some(entry) = stripe.remove(&tag) {
                self.note_removed(&entry);
                removed.push((tag, entry));
            }
        }
        removed
    }

    /// Distinct received sets that still have tags in the table.
    pub fn inbound_sets(&self) -> Vec<Arc<InboundTagSet<I>>> {
        let mut seen = HashSet::new();
        let mut sets = Vec::new();

        for stripe in &*self.stripes {
            for entry in stripe.lock().values() {
                if let TagOrigin::Inbound(set) = &entry.origin
                    && seen.insert(set.id)
                {
                    sets.push(Arc::clone(set));
                }
            }
        }
        sets
    }

    /// Received entries in the table.
    pub fn inbound_len(&self) -> usize {
        self.inbound.load(Ordering::Acquire)
    }

    /// Drop every tag of the received sets in `condemned` and refuse any
    /// further inserts for them. Returns the number of tags removed.
    pub fn revoke_inbound(&self, condemned: &[&Arc<InboundTagSet<I>>]) -> usize {
        let ids: HashSet<u64> = condemned
            .iter()
            .map(|set| {
                set.revoke();
                set.id
            })
            .collect();
        self.evict_inbound(&ids)
    }

    /// Remove every tag of the received sets in `ids`. Returns the number of
    /// tags removed.
    pub fn evict_inbound(&self, ids: &HashSet<u64>) -> usize {
        (0..self.stripes.len())
            .map(|index| {
                self.retain_stripe(index, |_, entry| match &entry.origin {
                    TagOrigin::Inbound(set) => !ids.contains(&set.id),
                    TagOrigin::Outbound { .. } => true,
                })
                .len()
            })
            .sum()
    }

    /// Count entries by origin.
    pub fn census(&self) -> TableCensus {
        let mut census = TableCensus::default();
        for stripe in &*self.stripes {
            for entry in stripe.lock().values() {
                match entry.origin {
                    TagOrigin::Outbound { .. } => census.outbound += 1,
                    TagOrigin::Inbound(_) => census.inbound += 1,
                }
            }
        }
        census
    }

    fn note_removed(&self, entry: &TagEntry<I>) {
        self.len.fetch_sub(1, Ordering::AcqRel);
        if let TagOrigin::Inbound(set) = &entry.origin {
            set.remaining.fetch_sub(1, Ordering::AcqRel);
            self.inbound.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
