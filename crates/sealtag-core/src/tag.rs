//! Single-use session tags.

use std::{collections::HashSet, fmt};

use crate::env::Environment;

/// Tag length in bytes.
pub const TAG_SIZE: usize = 32;

/// Opaque random identifier that indexes a session key.
///
/// A tag is consumed by the first successful lookup. Equality is plain byte
/// equality: tags are public on the wire, so there is nothing to hide in the
/// comparison.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag([u8; TAG_SIZE]);

impl Tag {
    /// Wrap raw tag bytes.
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read a tag from the first `TAG_SIZE` bytes of `bytes`.
    pub fn from_prefix(bytes: &[u8]) -> Option<Self> {
        let prefix = bytes.get(..TAG_SIZE)?;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(prefix);
        Some(Self(tag))
    }

    /// Draw a fresh tag from the environment's RNG.
    pub fn random<E: Environment>(env: &E) -> Self {
        Self(env.random_array())
    }

    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }

    /// Stripe index for a table with `mask + 1` stripes.
    ///
    /// Tags are uniformly random, so the leading bytes spread evenly.
    pub(crate) fn stripe(&self, mask: usize) -> usize {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[..8]);
        // Only the low bits survive the mask
        let index = u64::from_le_bytes(word) as usize;
        index & mask
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", hex::encode(&self.0[..4]))
    }
}

/// Mint `count` distinct random tags.
pub fn mint_tags<E: Environment>(env: &E, count: usize) -> Vec<Tag> {
    let mut seen = HashSet::with_capacity(count);
    let mut tags = Vec::with_capacity(count);

    while tags.len() < count {
        let tag = Tag::random(env);
        if seen.insert(tag) {
            tags.push(tag);
        }
    }

    tags
}
