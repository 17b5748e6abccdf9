//! Fuzz target for the decryption engine.
//!
//! # Strategy
//!
//! - Establish a live session so the receiver's tag table is populated
//! - Feed raw noise, noise behind a live tag, and bit-flipped copies of
//!   genuine messages
//! - Interleave clock advances and sweeps
//!
//! # Invariants
//!
//! - Decrypt never panics
//! - Rejections are always `UndecryptableMessage`
//! - Tag table accounting holds after every step

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sealtag_core::{KeyManagerConfig, SessionError};
use sealtag_harness::{InvariantRegistry, Peer, SimEnv};

#[derive(Debug, Arbitrary)]
struct Scenario {
    seed: u64,
    steps: Vec<Step>,
}

#[derive(Debug, Arbitrary)]
enum Step {
    /// Bytes straight onto the wire
    Noise(Vec<u8>),
    /// A genuine message with one byte flipped
    Flip { payload: Vec<u8>, index: u16, mask: u8 },
    /// A genuine message cut short
    Truncate { payload: Vec<u8>, keep: u16 },
    /// A genuine message, delivered twice
    Replay(Vec<u8>),
    Advance(u16),
    Sweep,
}

fuzz_target!(|scenario: Scenario| {
    let env = SimEnv::with_seed(scenario.seed);
    let config = KeyManagerConfig { tag_batch_size: 4, low_water_mark: 2, ..Default::default() };
    let alice = Peer::new("alice", env.clone(), config.clone()).expect("valid config");
    let bob = Peer::new("bob", env.clone(), config).expect("valid config");
    alice.exchange(&bob, b"hello").expect("bootstrap");

    let invariants = InvariantRegistry::standard();

    for step in scenario.steps.into_iter().take(64) {
        match step {
            Step::Noise(bytes) => expect_routine(bob.receive(&bytes).map(|_| ())),
            Step::Flip { payload, index, mask } => {
                let Ok(mut out) = alice.send(&bob, &payload) else { continue };
                if !out.wire.is_empty() {
                    let at = usize::from(index) % out.wire.len();
                    out.wire[at] ^= mask;
                }
                // CBC carries no MAC: a flip may still open to a different frame
                expect_routine(bob.receive(&out.wire).map(|_| ()));
            },
            Step::Truncate { payload, keep } => {
                let Ok(out) = alice.send(&bob, &payload) else { continue };
                let keep = usize::from(keep).min(out.wire.len());
                expect_routine(bob.receive(&out.wire[..keep]).map(|_| ()));
            },
            Step::Replay(payload) => {
                let Ok(out) = alice.send(&bob, &payload) else { continue };
                let first = bob.receive(&out.wire).expect("genuine message decrypts");
                assert_eq!(first.payload, payload);
                if let Some(delivered) = &out.delivered {
                    alice.ack(delivered).expect("ack");
                }
                expect_routine(bob.receive(&out.wire).map(|_| ()));
            },
            Step::Advance(secs) => env.advance(Duration::from_secs(u64::from(secs))),
            Step::Sweep => {
                alice.manager().sweep();
                bob.manager().sweep();
            },
        }

        for peer in [&alice, &bob] {
            if let Err(violations) = invariants.check_all(&peer.snapshot()) {
                panic!("{}: {violations:?}", peer.name());
            }
        }
    }
});

fn expect_routine(result: Result<(), SessionError>) {
    if let Err(err) = result {
        assert_eq!(err, SessionError::UndecryptableMessage);
    }
}
