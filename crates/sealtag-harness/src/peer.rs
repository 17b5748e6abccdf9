//! Simulated peer: one identity, one key manager.
//!
//! The key manager never acknowledges anything on its own. In a deployment
//! the transport reports delivery; here [`Peer::exchange`] plays that role by
//! acking the delivered set as soon as the recipient has decrypted it.

use std::sync::Arc;

use sealtag_core::{
    AckOutcome, ConfigError, Decrypted, DeliveredTags, Encrypted, KeyManager, KeyManagerConfig,
    ManagerSnapshot, SessionError,
};
use sealtag_crypto::{KeyPair, PublicKey};

use crate::SimEnv;

/// A party with a long-term key pair and its own key manager.
pub struct Peer {
    name: &'static str,
    manager: Arc<KeyManager<SimEnv>>,
    keys: KeyPair,
}

impl Peer {
    /// Create a peer with a fresh identity.
    ///
    /// # Errors
    ///
    /// `ConfigError` if `config` does not validate.
    pub fn new(name: &'static str, env: SimEnv, config: KeyManagerConfig) -> Result<Self, ConfigError> {
        let manager = KeyManager::new(env, config)?;
        let keys = manager.generate_keypair();
        Ok(Self { name, manager: Arc::new(manager), keys })
    }

    /// Name used in logs and assertion messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Long-term public key.
    pub fn public(&self) -> PublicKey {
        self.keys.public
    }

    /// The peer's key manager.
    pub fn manager(&self) -> &Arc<KeyManager<SimEnv>> {
        &self.manager
    }

    /// Environment shared with the manager.
    pub fn env(&self) -> &SimEnv {
        self.manager.env()
    }

    /// Encrypt `payload` for `to`.
    ///
    /// # Errors
    ///
    /// As [`KeyManager::encrypt`].
    pub fn send(&self, to: &Self, payload: &[u8]) -> Result<Encrypted, SessionError> {
        self.manager.encrypt(payload, &to.public())
    }

    /// Decrypt a message addressed to this peer.
    ///
    /// # Errors
    ///
    /// As [`KeyManager::decrypt`].
    pub fn receive(&self, wire: &[u8]) -> Result<Decrypted, SessionError> {
        self.manager.decrypt(wire, &self.keys.private)
    }

    /// Acknowledge a delivered set on the sending side.
    ///
    /// # Errors
    ///
    /// As [`KeyManager::tags_acked`].
    pub fn ack(&self, delivered: &DeliveredTags) -> Result<AckOutcome, SessionError> {
        self.manager.tags_acked(&delivered.target, &delivered.key, delivered.handle)
    }

    /// Report a delivered set lost on the sending side.
    ///
    /// # Errors
    ///
    /// As [`KeyManager::fail_tags`].
    pub fn fail(&self, delivered: &DeliveredTags) -> Result<bool, SessionError> {
        self.manager.fail_tags(&delivered.target, &delivered.key, delivered.handle)
    }

    /// Send `payload` to `to`, decrypt it there and ack any delivered tags.
    ///
    /// # Errors
    ///
    /// The first error from encrypting, decrypting or acking.
    pub fn exchange(&self, to: &Self, payload: &[u8]) -> Result<Exchange, SessionError> {
        let sent = self.send(to, payload)?;
        let received = to.receive(&sent.wire)?;
        let ack = match &sent.delivered {
            Some(delivered) => Some(self.ack(delivered)?),
            None => None,
        };

        tracing::trace!(
            from = self.name,
            to = to.name,
            path = ?sent.path,
            new_tags = received.new_tags,
            "exchange complete"
        );
        Ok(Exchange { sent, received, ack })
    }

    /// Manager status.
    pub fn snapshot(&self) -> ManagerSnapshot {
        self.manager.snapshot()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("name", &self.name).field("public", &self.keys.public).finish()
    }
}

/// Result of [`Peer::exchange`].
#[derive(Debug)]
pub struct Exchange {
    /// What the sender produced
    pub sent: Encrypted,
    /// What the recipient got
    pub received: Decrypted,
    /// Sender's ack outcome, if tags were delivered
    pub ack: Option<AckOutcome>,
}

#[cfg(test)]
mod tests {
    use sealtag_core::DeliveryPath;

    use super::*;

    #[test]
    fn exchange_bootstraps_then_uses_tags() {
        let env = SimEnv::with_seed(3);
        let config = KeyManagerConfig { tag_batch_size: 4, low_water_mark: 2, ..Default::default() };
        let alice = Peer::new("alice", env.clone(), config.clone()).unwrap();
        let bob = Peer::new("bob", env, config).unwrap();

        let first = alice.exchange(&bob, b"one").unwrap();
        assert_eq!(first.sent.path, DeliveryPath::Asymmetric);
        assert!(matches!(first.ack, Some(AckOutcome::Acked { .. })));

        let second = alice.exchange(&bob, b"two").unwrap();
        assert_eq!(second.sent.path, DeliveryPath::Tag);
        assert_eq!(second.received.payload, b"two");
    }
}
