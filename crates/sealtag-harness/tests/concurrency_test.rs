//! Concurrency tests: many threads against one key manager.
//!
//! Threads share the `SimEnv`, so the virtual clock only moves where a test
//! moves it; interleavings are up to the OS scheduler.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use sealtag_core::{KeyManager, KeyManagerConfig, Tag, mint_tags};
use sealtag_crypto::SessionKey;
use sealtag_harness::{InvariantRegistry, Peer, SimEnv};

fn config() -> KeyManagerConfig {
    KeyManagerConfig { tag_batch_size: 8, low_water_mark: 4, ..Default::default() }
}

#[test]
fn concurrent_consumers_never_share_a_tag() {
    let mgr = KeyManager::new(SimEnv::with_seed(1), config()).unwrap();
    let peer = mgr.generate_keypair();
    let key = mgr.create_session(&peer.public).unwrap();

    for _ in 0..4 {
        let tags = mint_tags(mgr.env(), 250);
        let handle = mgr.tags_delivered(&peer.public, key.clone(), tags).unwrap();
        mgr.tags_acked(&peer.public, &key, handle).unwrap();
    }
    assert_eq!(mgr.available_tags(&peer.public, &key), 1000);

    let (mgr, target, key) = (&mgr, &peer.public, &key);
    let taken: Vec<Vec<Tag>> = thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(move || {
                    let mut mine = Vec::new();
                    while let Some(tag) = mgr.consume_next_available_tag(target, key) {
                        mine.push(tag);
                    }
                    mine
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let all: Vec<Tag> = taken.into_iter().flatten().collect();
    let unique: HashSet<Tag> = all.iter().copied().collect();
    assert_eq!(all.len(), 1000);
    assert_eq!(unique.len(), 1000);
    assert_eq!(mgr.tag_table_len(), 0);
    InvariantRegistry::standard().assert_all(&mgr.snapshot(), "after draining");
}

#[test]
fn concurrent_exchanges_all_decrypt() {
    let env = SimEnv::with_seed(2);
    let alice = Peer::new("alice", env.clone(), config()).unwrap();
    let bobs: Vec<Peer> = ["bob", "carol", "dave"]
        .into_iter()
        .map(|name| Peer::new(name, env.clone(), config()).unwrap())
        .collect();

    thread::scope(|s| {
        for bob in &bobs {
            // Two senders per destination contend on the same session
            for sender in 0..2 {
                let alice = &alice;
                s.spawn(move || {
                    for i in 0..40 {
                        let text = format!("{} #{sender}.{i}", bob.name());
                        let exchange = alice.exchange(bob, text.as_bytes()).unwrap();
                        assert_eq!(exchange.received.payload, text.as_bytes());
                    }
                });
            }
        }
    });

    let invariants = InvariantRegistry::standard();
    invariants.assert_all(&alice.snapshot(), "alice after exchanges");
    for bob in &bobs {
        invariants.assert_all(&bob.snapshot(), bob.name());
    }

    let stats = alice.manager().stats();
    assert_eq!(stats.encrypt_new_session + stats.encrypt_existing_session, 240);
    assert_eq!(alice.manager().session_count(), 3);
}

#[test]
fn sweeper_racing_traffic_keeps_invariants() {
    let env = SimEnv::with_seed(3);
    let alice = Peer::new("alice", env.clone(), config()).unwrap();
    let bob = Peer::new("bob", env.clone(), config()).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let senders: Vec<_> = (0..3)
            .map(|t| {
                let (alice, bob) = (&alice, &bob);
                s.spawn(move || {
                    for i in 0..60 {
                        let text = format!("{t}:{i}");
                        let exchange = alice.exchange(bob, text.as_bytes()).unwrap();
                        assert_eq!(exchange.received.payload, text.as_bytes());
                    }
                })
            })
            .collect();

        s.spawn(|| {
            // Stays well under the outbound tag lifetime
            for _ in 0..200 {
                if done.load(Ordering::Relaxed) {
                    break;
                }
                env.advance(Duration::from_secs(1));
                alice.manager().sweep();
                bob.manager().sweep();
                thread::yield_now();
            }
        });

        for sender in senders {
            sender.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
    });

    let invariants = InvariantRegistry::standard();
    invariants.assert_all(&alice.snapshot(), "alice after race");
    invariants.assert_all(&bob.snapshot(), "bob after race");
}

#[test]
fn colliding_registrations_leave_tags_unknown() {
    let mgr = KeyManager::new(SimEnv::with_seed(4), config()).unwrap();
    let tags = mint_tags(mgr.env(), 100);

    thread::scope(|s| {
        for fill in [1u8, 2] {
            let (mgr, tags) = (&mgr, tags.clone());
            s.spawn(move || mgr.tags_received(SessionKey::from_bytes([fill; 32]), tags));
        }
    });

    // The first collision condemns both batches, however the inserts interleaved
    assert_eq!(mgr.tag_table_len(), 0);
    assert!((1..=2).contains(&mgr.stats().tag_collisions));
    assert!(tags.iter().all(|tag| mgr.consume_tag(tag).is_none()));
    InvariantRegistry::standard().assert_all(&mgr.snapshot(), "after collisions");
}
