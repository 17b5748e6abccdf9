//! Key rotation: offers, re-offers, promotion and what survives it.

use std::time::Duration;

use sealtag_core::{AckOutcome, DeliveryPath, KeyManagerConfig, SessionError, mint_tags};
use sealtag_crypto::SessionKey;
use sealtag_harness::{InvariantRegistry, Peer, SimEnv};

const MAX_KEY_AGE: Duration = Duration::from_secs(120);

fn config() -> KeyManagerConfig {
    KeyManagerConfig {
        tag_batch_size: 4,
        low_water_mark: 2,
        max_key_age: MAX_KEY_AGE,
        ..Default::default()
    }
}

/// Alice and Bob with an established, acked first batch.
fn established(seed: u64) -> (Peer, Peer, SimEnv) {
    let env = SimEnv::with_seed(seed);
    let alice = Peer::new("alice", env.clone(), config()).unwrap();
    let bob = Peer::new("bob", env.clone(), config()).unwrap();
    alice.exchange(&bob, b"hello").unwrap();
    (alice, bob, env)
}

fn age_out(env: &SimEnv) {
    env.advance(MAX_KEY_AGE + Duration::from_secs(1));
}

#[test]
fn current_key_only_changes_on_ack() {
    let (alice, bob, env) = established(1);
    let to_bob = bob.public();
    let old = alice.manager().current_key(&to_bob).unwrap();

    age_out(&env);
    let offer = alice.send(&bob, b"offer").unwrap();
    bob.receive(&offer.wire).unwrap();
    let offer = offer.delivered.unwrap();
    assert!(offer.rekey);

    // Old-key tags keep working while the offer is outstanding
    for text in [&b"a"[..], b"b", b"c"] {
        let out = alice.send(&bob, text).unwrap();
        assert_eq!(out.path, DeliveryPath::Tag);
        let got = bob.receive(&out.wire).unwrap();
        assert_eq!(got.key, old);
        assert_eq!(alice.manager().current_key(&to_bob), Some(old.clone()));
    }

    alice.ack(&offer).unwrap();
    assert_eq!(alice.manager().current_key(&to_bob), Some(offer.key.clone()));
    InvariantRegistry::standard().assert_all(&alice.snapshot(), "after promotion");
}

#[test]
fn old_key_is_refilled_while_offer_is_pending() {
    let (alice, bob, env) = established(8);
    let to_bob = bob.public();
    let old = alice.manager().current_key(&to_bob).unwrap();

    age_out(&env);
    let offer = alice.send(&bob, b"offer").unwrap();
    bob.receive(&offer.wire).unwrap();
    let offer = offer.delivered.unwrap();
    assert!(offer.rekey);

    // Well past the low water mark with the offer still unacked
    for i in 0..6 {
        let text = format!("while pending {i}");
        let exchange = alice.exchange(&bob, text.as_bytes()).unwrap();
        assert_eq!(exchange.sent.path, DeliveryPath::Tag, "message {i}");
        assert_eq!(exchange.received.key, old);
        assert!(exchange.sent.delivered.is_none_or(|d| !d.rekey && d.key == old));
    }

    assert_eq!(alice.manager().current_key(&to_bob), Some(old));
    assert_eq!(alice.manager().next_key(&to_bob), Some(offer.key.clone()));
    alice.ack(&offer).unwrap();
    assert_eq!(alice.manager().current_key(&to_bob), Some(offer.key));
    InvariantRegistry::standard().assert_all(&alice.snapshot(), "after delayed promotion");
}

#[test]
fn delivery_after_promotion_cannot_revive_the_old_key() {
    let (alice, bob, _env) = established(9);
    let to_bob = bob.public();
    let mgr = alice.manager();
    let k1 = mgr.current_key(&to_bob).unwrap();

    let k2 = SessionKey::from_bytes([2; 32]);
    let offer = mgr.tags_delivered(&to_bob, k2.clone(), mint_tags(mgr.env(), 3)).unwrap();
    mgr.tags_acked(&to_bob, &k2, offer).unwrap();

    let late = mgr.tags_delivered(&to_bob, k1, mint_tags(mgr.env(), 3));
    assert_eq!(late.unwrap_err(), SessionError::RetiredKey { target: to_bob });
    assert_eq!(mgr.next_key(&to_bob), None);
    assert_eq!(mgr.current_key(&to_bob), Some(k2));
}

#[test]
fn lost_offer_is_reoffered_under_the_same_key() {
    let (alice, bob, env) = established(2);
    let to_bob = bob.public();

    age_out(&env);
    let first = alice.send(&bob, b"offer").unwrap().delivered.unwrap();
    assert!(alice.fail(&first).unwrap());
    assert_eq!(alice.manager().next_key(&to_bob), Some(first.key.clone()));

    let second = alice.send(&bob, b"again").unwrap();
    bob.receive(&second.wire).unwrap();
    let second = second.delivered.unwrap();
    assert!(second.rekey);
    assert_eq!(second.key, first.key);
    assert_ne!(second.handle, first.handle);

    assert_eq!(alice.ack(&second).unwrap(), AckOutcome::Acked { promoted: true, collisions: 0 });
}

#[test]
fn swept_offer_is_reoffered() {
    let (alice, bob, env) = established(3);
    let to_bob = bob.public();

    age_out(&env);
    let first = alice.send(&bob, b"offer").unwrap().delivered.unwrap();
    env.advance(alice.manager().config().pending_ack_timeout + Duration::from_secs(1));
    assert_eq!(alice.manager().sweep().pending_discarded, 1);

    let again = alice.send(&bob, b"again").unwrap().delivered.unwrap();
    assert_eq!(again.key, first.key);
    assert_eq!(alice.ack(&first).unwrap(), AckOutcome::Ignored);
    assert_eq!(alice.manager().next_key(&to_bob), Some(first.key));
}

#[test]
fn latest_offer_wins() {
    let (alice, bob, _env) = established(4);
    let to_bob = bob.public();
    let mgr = alice.manager();

    let k2 = SessionKey::from_bytes([2; 32]);
    let k3 = SessionKey::from_bytes([3; 32]);
    let h2 = mgr.tags_delivered(&to_bob, k2.clone(), mint_tags(mgr.env(), 3)).unwrap();
    let h3 = mgr.tags_delivered(&to_bob, k3.clone(), mint_tags(mgr.env(), 3)).unwrap();

    assert_eq!(mgr.next_key(&to_bob), Some(k3.clone()));
    assert_eq!(mgr.tags_acked(&to_bob, &k2, h2).unwrap(), AckOutcome::Ignored);
    assert_eq!(
        mgr.tags_acked(&to_bob, &k3, h3).unwrap(),
        AckOutcome::Acked { promoted: true, collisions: 0 }
    );
    assert_eq!(mgr.current_key(&to_bob), Some(k3));
}

#[test]
fn promotion_retires_old_key_tags() {
    let (alice, bob, env) = established(5);
    let to_bob = bob.public();
    let mgr = alice.manager();
    let old = mgr.current_key(&to_bob).unwrap();
    assert_eq!(mgr.available_tags(&to_bob, &old), 4);

    age_out(&env);
    let offer = alice.send(&bob, b"offer").unwrap();
    bob.receive(&offer.wire).unwrap();
    let offer = offer.delivered.unwrap();
    assert_eq!(mgr.available_tags(&to_bob, &old), 3);

    alice.ack(&offer).unwrap();
    assert_eq!(mgr.available_tags(&to_bob, &old), 0);
    assert_eq!(mgr.available_tags(&to_bob, &offer.key), 4);
    assert_eq!(mgr.tag_table_len(), 4);
    InvariantRegistry::standard().assert_all(&alice.snapshot(), "after promotion");
}

#[test]
fn messages_in_flight_across_promotion_still_decrypt() {
    let (alice, bob, env) = established(6);

    age_out(&env);
    let offer = alice.send(&bob, b"offer").unwrap();
    bob.receive(&offer.wire).unwrap();

    // Encrypted under the old key, delivered after the new key is live
    let late = alice.send(&bob, b"late").unwrap();
    alice.ack(offer.delivered.as_ref().unwrap()).unwrap();

    let got = bob.receive(&late.wire).unwrap();
    assert_eq!(got.payload, b"late");
    assert_eq!(got.path, DeliveryPath::Tag);
}

#[test]
fn promotion_resets_key_age() {
    let (alice, bob, env) = established(7);

    age_out(&env);
    let offer = alice.exchange(&bob, b"offer").unwrap();
    assert_eq!(offer.ack, Some(AckOutcome::Acked { promoted: true, collisions: 0 }));

    // A fresh key does not rotate again on the next message
    let next = alice.send(&bob, b"next").unwrap();
    assert!(next.delivered.is_none_or(|d| !d.rekey));
    assert_eq!(alice.manager().next_key(&bob.public()), None);
}
