//! Invariant checking over [`ManagerSnapshot`]s.
//!
//! Checks run against a snapshot taken while the manager is quiescent (no
//! encrypt, decrypt or sweep in flight). A snapshot taken mid-operation is
//! only consistent per session, so cross-structure accounting may be off by
//! the operations still running.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.assert_all(&manager.snapshot(), "after rekey");
//! ```

mod checks;

pub use checks::{
    AckedTagsPublished, NextKeyDistinct, NoEmptyAckedSets, PendingTagsUnpublished,
    TableAccounting,
};
use sealtag_core::ManagerSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Which invariant was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantKind {
    /// Every tag of an ACKED set is in the tag table
    AckedTagsPublished,
    /// No tag of a PENDING set is in the tag table
    PendingTagsUnpublished,
    /// Table length matches the tags sessions and received sets account for
    TableAccounting,
    /// An offered next key never equals the current key
    NextKeyDistinct,
    /// Exhausted ACKED sets are discarded
    NoEmptyAckedSets,
}

impl std::fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AckedTagsPublished => "acked_tags_published",
            Self::PendingTagsUnpublished => "pending_tags_unpublished",
            Self::TableAccounting => "table_accounting",
            Self::NextKeyDistinct => "next_key_distinct",
            Self::NoEmptyAckedSets => "no_empty_acked_sets",
        };
        f.write_str(name)
    }
}

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Violated invariant
    pub invariant: InvariantKind,
    /// What went wrong
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property that holds for every quiescent manager.
pub trait Invariant: Send + Sync {
    /// Which invariant this is.
    fn kind(&self) -> InvariantKind;

    /// Check the invariant against `state`.
    fn check(&self, state: &ManagerSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard check.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(AckedTagsPublished);
        registry.add(PendingTagsUnpublished);
        registry.add(TableAccounting);
        registry.add(NextKeyDistinct);
        registry.add(NoEmptyAckedSets);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &ManagerSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants and panic with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &ManagerSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
