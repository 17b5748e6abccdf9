//! Expiration sweeper.
//!
//! A pass walks outbound sessions in small bursts (one session lock at a
//! time), then walks the tag table stripe by stripe for received sets past
//! their lifetime, then trims the table if it is over capacity. It only ever
//! removes state.

use std::{collections::HashSet, sync::Arc};

use sealtag_crypto::{AsymmetricCipher, SymmetricCipher};
use tokio::task::JoinHandle;

use crate::{
    env::{Environment, elapsed},
    manager::KeyManager,
    stats::Counter,
    tag_table::TagOrigin,
};

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// PENDING sets force-discarded for missing their ack
    pub pending_discarded: usize,
    /// ACKED outbound sets past their lifetime
    pub acked_expired: usize,
    /// Outbound tags removed from the table
    pub outbound_tags_expired: usize,
    /// Received tags past their lifetime
    pub inbound_tags_expired: usize,
    /// Received tags evicted for capacity
    pub tags_evicted: usize,
}

impl SweepReport {
    /// Returns true if the pass removed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) fn sweep<E, S, A>(mgr: &KeyManager<E, S, A>) -> SweepReport
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let now = mgr.env().now();
    let config = mgr.config();

    let sessions = mgr.sessions.sweep(now, config, &mgr.tags);

    let lifetime = config.inbound_tag_lifetime;
    let inbound_tags_expired: usize = (0..mgr.tags.stripe_count())
        .map(|index| {
            mgr.tags
                .retain_stripe(index, |_, entry| match &entry.origin {
                    TagOrigin::Inbound(set) => elapsed(now, set.created_at()) <= lifetime,
                    TagOrigin::Outbound { .. } => true,
                })
                .len()
        })
        .sum();

    mgr.stats.add(Counter::TagsExpired, sessions.tags_removed + inbound_tags_expired);

    let report = SweepReport {
        pending_discarded: sessions.pending_discarded,
        acked_expired: sessions.acked_expired,
        outbound_tags_expired: sessions.tags_removed,
        inbound_tags_expired,
        tags_evicted: clear_excess(mgr),
    };

    if !report.is_empty() {
        tracing::debug!(
            pending_discarded = report.pending_discarded,
            acked_expired = report.acked_expired,
            outbound_tags = report.outbound_tags_expired,
            inbound_tags = report.inbound_tags_expired,
            evicted = report.tags_evicted,
            "sweep complete"
        );
    }
    report
}

/// Evict the oldest received sets until the table is back under
/// `max_tag_table_entries`. Returns the number of tags evicted.
pub(crate) fn clear_excess<E, S, A>(mgr: &KeyManager<E, S, A>) -> usize
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let max = mgr.config().max_tag_table_entries;
    let len = mgr.tags.len();
    // Only received sets are evictable
    if len <= max || mgr.tags.inbound_len() == 0 {
        return 0;
    }
    let overage = len - max;

    let mut sets = mgr.tags.inbound_sets();
    sets.sort_by_key(|set| (set.created_at(), set.id()));

    let mut victims = HashSet::new();
    let mut freed = 0;
    for set in &sets {
        if freed >= overage {
            break;
        }
        victims.insert(set.id());
        freed += set.remaining();
    }
    if victims.is_empty() {
        return 0;
    }

    let evicted = mgr.tags.evict_inbound(&victims);
    mgr.stats.add(Counter::TagsEvicted, evicted);
    tracing::warn!(
        evicted,
        sets = victims.len(),
        table_len = mgr.tags.len(),
        max,
        "tag table over capacity, evicted oldest received tags"
    );
    evicted
}

/// Run [`KeyManager::sweep`] every `sweep_interval` on the tokio runtime.
///
/// The task holds only a weak reference and exits once the manager is
/// dropped.
pub fn spawn_sweeper<E, S, A>(manager: &Arc<KeyManager<E, S, A>>) -> JoinHandle<()>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let weak = Arc::downgrade(manager);
    let env = manager.env().clone();
    let interval = manager.config().sweep_interval;

    tokio::spawn(async move {
        loop {
            env.sleep(interval).await;

            let Some(manager) = weak.upgrade() else {
                tracing::debug!("key manager dropped, sweeper exiting");
                break;
            };
            manager.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sealtag_crypto::SessionKey;

    use super::*;
    use crate::{config::KeyManagerConfig, tag::mint_tags, test_env::TestEnv};

    fn manager(config: KeyManagerConfig) -> KeyManager<TestEnv> {
        KeyManager::new(TestEnv::with_seed(11), config).unwrap()
    }

    #[test]
    fn received_tags_expire_after_inbound_lifetime() {
        let mgr = manager(KeyManagerConfig::default());
        mgr.tags_received(SessionKey::from_bytes([1; 32]), mint_tags(mgr.env(), 5));

        mgr.env().advance(mgr.config().inbound_tag_lifetime);
        assert!(mgr.sweep().is_empty());

        mgr.env().advance(Duration::from_secs(1));
        let report = mgr.sweep();
        assert_eq!(report.inbound_tags_expired, 5);
        assert_eq!(mgr.tag_table_len(), 0);
        assert_eq!(mgr.stats().tags_expired, 5);
    }

    #[test]
    fn unacked_sets_are_force_discarded() {
        let mgr = manager(KeyManagerConfig::default());
        let peer = mgr.generate_keypair();
        let out = mgr.encrypt(b"hi", &peer.public).unwrap();
        let delivered = out.delivered.unwrap();

        mgr.env().advance(mgr.config().pending_ack_timeout + Duration::from_secs(1));
        let report = mgr.sweep();
        assert_eq!(report.pending_discarded, 1);

        // Late ack after the discard is a no-op
        let outcome = mgr.tags_acked(&peer.public, &delivered.key, delivered.handle).unwrap();
        assert_eq!(outcome, crate::AckOutcome::Ignored);
        assert_eq!(mgr.tag_table_len(), 0);
    }

    #[test]
    fn overflow_evicts_oldest_received_sets() {
        let config = KeyManagerConfig { max_tag_table_entries: 10, ..Default::default() };
        let mgr = manager(config);
        let oldest = mint_tags(mgr.env(), 6);
        mgr.tags_received(SessionKey::from_bytes([1; 32]), oldest.clone());

        mgr.env().advance(Duration::from_secs(1));
        let newer = mint_tags(mgr.env(), 6);
        mgr.tags_received(SessionKey::from_bytes([2; 32]), newer.clone());

        assert_eq!(mgr.tag_table_len(), 6);
        assert!(oldest.iter().all(|t| mgr.consume_tag(t).is_none()));
        assert_eq!(mgr.stats().tags_evicted, 6);
        assert!(mgr.consume_tag(&newer[0]).is_some());
    }

    #[test]
    fn outbound_overflow_alone_evicts_nothing() {
        let config = KeyManagerConfig { max_tag_table_entries: 2, ..Default::default() };
        let mgr = manager(config);
        let peer = mgr.generate_keypair();
        let key = mgr.create_session(&peer.public).unwrap();
        let handle = mgr.tags_delivered(&peer.public, key.clone(), mint_tags(mgr.env(), 4)).unwrap();
        mgr.tags_acked(&peer.public, &key, handle).unwrap();

        assert_eq!(mgr.tag_table_len(), 4);
        assert_eq!(clear_excess(&mgr), 0);
        assert_eq!(mgr.available_tags(&peer.public, &key), 4);
        assert_eq!(mgr.stats().tags_evicted, 0);
    }

    #[tokio::test]
    async fn spawned_sweeper_stops_when_manager_dropped() {
        let config = KeyManagerConfig { sweep_interval: Duration::from_secs(5), ..Default::default() };
        let mgr = Arc::new(manager(config));
        mgr.tags_received(SessionKey::from_bytes([1; 32]), mint_tags(mgr.env(), 3));

        let handle = spawn_sweeper(&mgr);
        for _ in 0..1000 {
            if mgr.tag_table_len() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(mgr.tag_table_len(), 0);

        drop(mgr);
        handle.await.unwrap();
    }
}
