//! Deterministic simulation harness for sealtag.
//!
//! - [`SimEnv`]: virtual clock plus seeded RNG behind the core `Environment`
//!   trait, so every run replays from its seed
//! - [`Peer`]: an identity with its own key manager and helpers that stand in
//!   for the transport's delivery acks
//! - [`invariants`]: properties checked against manager snapshots after each
//!   step of a scenario

#![forbid(unsafe_code)]

pub mod invariants;
pub mod peer;
pub mod sim_env;

pub use invariants::{Invariant, InvariantKind, InvariantRegistry, Violation};
pub use peer::{Exchange, Peer};
pub use sim_env::{SimEnv, SimInstant};
