//! Standard invariant checks.

use sealtag_core::{ManagerSnapshot, TagSetState};

use super::{Invariant, InvariantKind, InvariantResult, Violation};

/// Every remaining tag of an ACKED set is in the tag table.
///
/// A tag the sender still plans to use but the table has lost would turn
/// into an undecryptable message on the peer.
pub struct AckedTagsPublished;

impl Invariant for AckedTagsPublished {
    fn kind(&self) -> InvariantKind {
        InvariantKind::AckedTagsPublished
    }

    fn check(&self, state: &ManagerSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for set in session.sets.iter().filter(|s| s.state == TagSetState::Acked) {
                if set.in_table != set.tags {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!(
                            "peer {} set {:?}: {} tags, {} in table",
                            session.target, set.handle, set.tags, set.in_table
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// PENDING sets stay out of the tag table until acknowledged.
pub struct PendingTagsUnpublished;

impl Invariant for PendingTagsUnpublished {
    fn kind(&self) -> InvariantKind {
        InvariantKind::PendingTagsUnpublished
    }

    fn check(&self, state: &ManagerSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for set in session.sets.iter().filter(|s| s.state == TagSetState::Pending) {
                if set.in_table != 0 {
                    return Err(Violation {
                        invariant: self.kind(),
                        message: format!(
                            "peer {} pending set {:?} has {} tags in table",
                            session.target, set.handle, set.in_table
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Table entries are exactly the ACKED outbound tags plus the remaining
/// received tags, and the length counter agrees.
pub struct TableAccounting;

impl Invariant for TableAccounting {
    fn kind(&self) -> InvariantKind {
        InvariantKind::TableAccounting
    }

    fn check(&self, state: &ManagerSnapshot) -> InvariantResult {
        let census = state.census;
        let fail = |message: String| -> InvariantResult {
            Err(Violation { invariant: self.kind(), message })
        };

        if census.outbound != state.acked_tags() {
            return fail(format!(
                "{} outbound entries, sessions hold {} acked tags",
                census.outbound,
                state.acked_tags()
            ));
        }
        if census.inbound != state.inbound_tags() {
            return fail(format!(
                "{} inbound entries, received sets hold {} tags",
                census.inbound,
                state.inbound_tags()
            ));
        }
        if state.table_len != census.outbound + census.inbound {
            return fail(format!(
                "len counter {} != {} entries",
                state.table_len,
                census.outbound + census.inbound
            ));
        }
        Ok(())
    }
}

/// An offered next key differs from the current key.
pub struct NextKeyDistinct;

impl Invariant for NextKeyDistinct {
    fn kind(&self) -> InvariantKind {
        InvariantKind::NextKeyDistinct
    }

    fn check(&self, state: &ManagerSnapshot) -> InvariantResult {
        for session in &state.sessions {
            if session.next_key.as_ref() == Some(&session.current_key) {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!(
                        "peer {}: next key equals current key {}",
                        session.target, session.current_key
                    ),
                });
            }
        }
        Ok(())
    }
}

/// ACKED sets are dropped once their last tag is used.
pub struct NoEmptyAckedSets;

impl Invariant for NoEmptyAckedSets {
    fn kind(&self) -> InvariantKind {
        InvariantKind::NoEmptyAckedSets
    }

    fn check(&self, state: &ManagerSnapshot) -> InvariantResult {
        for session in &state.sessions {
            let empty = session.sets.iter().find(|s| s.state == TagSetState::Acked && s.tags == 0);
            if let Some(set) = empty {
                return Err(Violation {
                    invariant: self.kind(),
                    message: format!("peer {} kept empty acked set {:?}", session.target, set.handle),
                });
            }
        }
        Ok(())
    }
}
