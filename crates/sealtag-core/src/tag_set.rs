//! Tag sets and the arena that owns them.
//!
//! A [`TagSet`] is a batch of tags minted together under one key. Sessions
//! keep their sets in a [`TagSetArena`] and hand out [`TagSetHandle`]s, which
//! carry a generation stamp. Removing a set bumps its slot's generation, so an
//! ack or nack that arrives after the sweeper discarded the set resolves to
//! nothing instead of touching whatever set reused the slot.

use std::{ops::Sub, time::Duration};

use sealtag_crypto::SessionKey;

use crate::{env::elapsed, tag::Tag};

/// Acknowledgement state of a tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagSetState {
    /// Delivered to the peer, not yet acknowledged. Not in the tag table.
    Pending,
    /// Acknowledged by the peer. Every remaining tag is in the tag table.
    Acked,
}

/// Batch of tags minted under one key.
#[derive(Debug, Clone)]
pub struct TagSet<I> {
    key: SessionKey,
    tags: Vec<Tag>,
    created_at: I,
    state: TagSetState,
}

impl<I> TagSet<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// New PENDING set.
    pub fn new(key: SessionKey, tags: Vec<Tag>, created_at: I) -> Self {
        Self { key, tags, created_at, state: TagSetState::Pending }
    }

    /// Key every tag in the set was minted under.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Remaining tags.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Creation time.
    pub fn created_at(&self) -> I {
        self.created_at
    }

    /// Current state.
    pub fn state(&self) -> TagSetState {
        self.state
    }

    /// Returns true once the peer acknowledged the set.
    pub fn is_acked(&self) -> bool {
        self.state == TagSetState::Acked
    }

    /// Remaining tag count.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true when every tag has been consumed or removed.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Time since creation.
    pub fn age(&self, now: I) -> Duration {
        elapsed(now, self.created_at)
    }

    pub(crate) fn mark_acked(&mut self) {
        self.state = TagSetState::Acked;
    }

    pub(crate) fn pop_tag(&mut self) -> Option<Tag> {
        self.tags.pop()
    }

    pub(crate) fn remove_tag(&mut self, tag: &Tag) -> bool {
        match self.tags.iter().position(|t| t == tag) {
            Some(pos) => {
                self.tags.swap_remove(pos);
                true
            },
            None => false,
        }
    }
}

/// Generation-stamped reference to a set in a session's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagSetHandle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<I> {
    generation: u64,
    set: Option<TagSet<I>>,
}

/// Slot storage for a session's tag sets.
#[derive(Debug)]
pub struct TagSetArena<I> {
    slots: Vec<Slot<I>>,
    free: Vec<usize>,
    len: usize,
}

impl<I> Default for TagSetArena<I> {
    fn default() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), len: 0 }
    }
}

impl<I> TagSetArena<I> {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a set, reusing a free slot when one exists.
    pub fn insert(&mut self, set: TagSet<I>) -> TagSetHandle {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.set = Some(set);
            return TagSetHandle { index, generation: slot.generation };
        }

        let index = self.slots.len();
        self.slots.push(Slot { generation: 0, set: Some(set) });
        TagSetHandle { index, generation: 0 }
    }

    /// Set behind `handle`, if the handle is still live.
    pub fn get(&self, handle: TagSetHandle) -> Option<&TagSet<I>> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.set.as_ref())
    }

    /// Mutable access to the set behind `handle`, if still live.
    pub fn get_mut(&mut self, handle: TagSetHandle) -> Option<&mut TagSet<I>> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.set.as_mut())
    }

    /// Remove the set behind `handle`. Every outstanding copy of the handle
    /// goes stale.
    pub fn remove(&mut self, handle: TagSetHandle) -> Option<TagSet<I>> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }

        let set = slot.set.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(set)
    }

    /// Returns true if `handle` still refers to a set.
    pub fn contains(&self, handle: TagSetHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live sets.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when no sets are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(tags: usize, at: u64) -> TagSet<Duration> {
        let tags = (0..tags).map(|i| Tag::from_bytes([i as u8; 32])).collect();
        TagSet::new(SessionKey::from_bytes([7; 32]), tags, Duration::from_secs(at))
    }

    #[test]
    fn new_sets_are_pending() {
        let s = set(3, 0);
        assert_eq!(s.state(), TagSetState::Pending);
        assert!(!s.is_acked());
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn pop_and_remove_drain_the_set() {
        let mut s = set(3, 0);

        assert!(s.remove_tag(&Tag::from_bytes([1; 32])));
        assert!(!s.remove_tag(&Tag::from_bytes([1; 32])));
        assert!(s.pop_tag().is_some());
        assert!(s.pop_tag().is_some());
        assert!(s.pop_tag().is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn age_is_measured_from_creation() {
        let s = set(1, 10);
        assert_eq!(s.age(Duration::from_secs(25)), Duration::from_secs(15));
    }

    #[test]
    fn removed_handle_goes_stale() {
        let mut arena = TagSetArena::new();
        let handle = arena.insert(set(2, 0));

        assert!(arena.contains(handle));
        assert!(arena.remove(handle).is_some());
        assert!(!arena.contains(handle));
        assert!(arena.remove(handle).is_none());
        assert!(arena.get_mut(handle).is_none());
    }

    #[test]
    fn reused_slot_does_not_resurrect_old_handle() {
        let mut arena = TagSetArena::new();
        let old = arena.insert(set(1, 0));
        arena.remove(old);

        let new = arena.insert(set(5, 1));
        assert_ne!(old, new);
        assert!(arena.get(old).is_none());
        assert_eq!(arena.get(new).map(TagSet::len), Some(5));
        assert_eq!(arena.len(), 1);
    }
}
