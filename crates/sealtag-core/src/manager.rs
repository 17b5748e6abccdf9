//! Per-identity key manager.
//!
//! `KeyManager` owns everything one local identity needs: the session
//! registry, the tag table, counters and the two ciphers. Engines and the
//! sweeper operate on a `&KeyManager`, so several identities can coexist in
//! one process without sharing state.

use std::sync::Arc;

use sealtag_crypto::{
    Aes256Cbc, AsymmetricCipher, KeyPair, PrivateKey, PublicKey, SessionKey, SymmetricCipher,
    X25519SealedBox,
};

use crate::{
    config::KeyManagerConfig,
    decrypt::{self, Decrypted},
    encrypt::{self, Encrypted},
    env::{Environment, elapsed},
    error::{ConfigError, SessionError},
    session::{AckOutcome, SessionRegistry},
    snapshot::{InboundSetSnapshot, ManagerSnapshot},
    stats::{Counter, EngineStats, StatsSnapshot},
    sweeper::{self, SweepReport},
    tag::Tag,
    tag_set::TagSetHandle,
    tag_table::{InsertOutcome, TagEntry, TagOrigin, TagTable},
};

/// Session keys and tags for one local identity.
///
/// `S` is the tag-path cipher and `A` the bootstrap cipher. Both default to
/// the primitives in `sealtag-crypto`.
pub struct KeyManager<E: Environment, S = Aes256Cbc, A = X25519SealedBox> {
    env: E,
    config: KeyManagerConfig,
    pub(crate) sessions: SessionRegistry<E::Instant>,
    pub(crate) tags: TagTable<E::Instant>,
    pub(crate) stats: EngineStats,
    pub(crate) symmetric: S,
    pub(crate) asymmetric: A,
}

impl<E: Environment> KeyManager<E> {
    /// Key manager with the default ciphers.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found by
    /// [`KeyManagerConfig::validate`].
    pub fn new(env: E, config: KeyManagerConfig) -> Result<Self, ConfigError> {
        Self::with_ciphers(env, config, Aes256Cbc, X25519SealedBox)
    }
}

impl<E, S, A> KeyManager<E, S, A>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    /// Key manager with caller-supplied ciphers.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found by
    /// [`KeyManagerConfig::validate`].
    pub fn with_ciphers(
        env: E,
        config: KeyManagerConfig,
        symmetric: S,
        asymmetric: A,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            tags: TagTable::new(config.tag_table_shards),
            sessions: SessionRegistry::new(),
            stats: EngineStats::default(),
            env,
            config,
            symmetric,
            asymmetric,
        })
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Validated configuration.
    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Generate a long-term key pair for a local identity.
    pub fn generate_keypair(&self) -> KeyPair {
        self.asymmetric.derive_keypair(self.env.random_array())
    }

    /// Return the current key for `target`, creating the session if needed.
    ///
    /// # Errors
    ///
    /// `SessionError::InvalidKey` if `target` is not a usable public key. No
    /// session is created in that case.
    pub fn create_session(&self, target: &PublicKey) -> Result<SessionKey, SessionError> {
        if let Some(key) = self.sessions.current_key(target) {
            return Ok(key);
        }

        self.asymmetric.check_public_key(target)?;

        let (key, created) = self
            .sessions
            .get_or_create(*target, self.env.now(), || SessionKey::from_bytes(self.env.random_array()));
        if created {
            tracing::info!(peer = %target, key = %key.fingerprint(), "session created");
        }
        Ok(key)
    }

    /// Current key for `target`.
    pub fn current_key(&self, target: &PublicKey) -> Option<SessionKey> {
        self.sessions.current_key(target)
    }

    /// Offered but not yet acknowledged next key for `target`.
    pub fn next_key(&self, target: &PublicKey) -> Option<SessionKey> {
        self.sessions.next_key(target)
    }

    /// Atomically take one ACKED tag bound to `key`.
    ///
    /// Sets past `outbound_tag_lifetime` are skipped even if the sweeper has
    /// not removed them yet. `None` forces the asymmetric path.
    pub fn consume_next_available_tag(&self, target: &PublicKey, key: &SessionKey) -> Option<Tag> {
        self.sessions.consume_next_available_tag(
            target,
            key,
            self.env.now(),
            self.config.outbound_tag_lifetime,
            &self.tags,
        )
    }

    /// Unexpired ACKED tags bound to `key` for `target`.
    pub fn available_tags(&self, target: &PublicKey, key: &SessionKey) -> usize {
        self.sessions.available_tags(
            target,
            key,
            self.env.now(),
            self.config.outbound_tag_lifetime,
        )
    }

    /// Time until the newest ACKED set bound to `key` expires.
    pub fn available_time_left(
        &self,
        target: &PublicKey,
        key: &SessionKey,
    ) -> Option<std::time::Duration> {
        self.sessions.available_time_left(
            target,
            key,
            self.env.now(),
            self.config.outbound_tag_lifetime,
        )
    }

    /// Record tags handed to `target` as a PENDING set.
    ///
    /// The tags stay out of the tag table until [`Self::tags_acked`].
    ///
    /// # Errors
    ///
    /// - `SessionError::SessionNotFound` if `target` has no session
    /// - `SessionError::RetiredKey` if `key` was retired by a rotation
    pub fn tags_delivered(
        &self,
        target: &PublicKey,
        key: SessionKey,
        tags: Vec<Tag>,
    ) -> Result<TagSetHandle, SessionError> {
        self.sessions.tags_delivered(target, key, tags, self.env.now())
    }

    /// The peer acknowledged a delivered set.
    ///
    /// # Errors
    ///
    /// `SessionError::SessionNotFound` if `target` has no session. Stale
    /// handles resolve to `AckOutcome::Ignored`.
    pub fn tags_acked(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        handle: TagSetHandle,
    ) -> Result<AckOutcome, SessionError> {
        let outcome =
            self.sessions.tags_acked(target, key, handle, self.env.now(), &self.tags)?;
        if let AckOutcome::Acked { collisions, .. } = outcome {
            self.stats.add(Counter::TagCollisions, collisions);
        }
        Ok(outcome)
    }

    /// The peer reported a delivered set lost. Returns true if a set was
    /// dropped.
    ///
    /// # Errors
    ///
    /// `SessionError::SessionNotFound` if `target` has no session.
    pub fn fail_tags(
        &self,
        target: &PublicKey,
        key: &SessionKey,
        handle: TagSetHandle,
    ) -> Result<bool, SessionError> {
        self.sessions.fail_tags(target, key, handle, &self.tags)
    }

    /// Register tags that arrived inside a decrypted payload.
    ///
    /// They are trusted immediately. A tag already known under the same key is
    /// ignored. A tag known under a different key condemns both batches: the
    /// earlier received set and this one leave the table and stay out.
    /// Returns the number of tags that remain registered.
    pub fn tags_received(&self, key: SessionKey, tags: Vec<Tag>) -> usize {
        let offered = tags.len();
        let set = self.tags.new_inbound_set(key.clone(), self.env.now(), offered);

        let mut inserted = 0;
        let mut collision = None;
        for tag in tags {
            let entry = TagEntry { key: key.clone(), origin: TagOrigin::Inbound(Arc::clone(&set)) };
            match self.tags.insert(tag, entry) {
                InsertOutcome::Inserted => inserted += 1,
                InsertOutcome::Duplicate => {},
                InsertOutcome::Revoked => break,
                InsertOutcome::Collision(evicted) => {
                    collision = Some((tag, evicted.origin));
                    break;
                },
            }
        }

        if let Some((tag, origin)) = collision {
            let removed = match &origin {
                TagOrigin::Inbound(earlier) => self.tags.revoke_inbound(&[earlier, &set]),
                TagOrigin::Outbound { target, handle } => {
                    self.sessions.forget_tag(target, *handle, &tag);
                    self.tags.revoke_inbound(&[&set])
                },
            };
            self.stats.incr(Counter::TagCollisions);
            tracing::warn!(
                key = %key.fingerprint(),
                removed,
                "received tags collided, dropping both sets"
            );
        }
        if set.is_revoked() {
            inserted = 0;
        }

        tracing::debug!(key = %key.fingerprint(), offered, inserted, "tags received");
        sweeper::clear_excess(self);
        inserted
    }

    /// Look up and remove `tag`, returning the key it maps to.
    pub fn consume_tag(&self, tag: &Tag) -> Option<SessionKey> {
        let entry = self.tags.lookup_and_remove(tag)?;
        if let TagOrigin::Outbound { target, handle } = &entry.origin {
            self.sessions.forget_tag(target, *handle, tag);
        }
        Some(entry.key)
    }

    /// Encrypt `payload` to `target`.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidKey` for an unusable `target`; nothing changes
    /// - `SessionError::CipherFailure` if a primitive fails; minted tags are
    ///   not recorded as delivered
    pub fn encrypt(&self, payload: &[u8], target: &PublicKey) -> Result<Encrypted, SessionError> {
        encrypt::encrypt(self, payload, target, 0)
    }

    /// Encrypt `payload` to `target`, padding the inner frame to at least
    /// `padding_size` bytes.
    ///
    /// # Errors
    ///
    /// As [`Self::encrypt`].
    pub fn encrypt_padded(
        &self,
        payload: &[u8],
        target: &PublicKey,
        padding_size: usize,
    ) -> Result<Encrypted, SessionError> {
        encrypt::encrypt(self, payload, target, padding_size)
    }

    /// Decrypt a message addressed to the holder of `private`.
    ///
    /// # Errors
    ///
    /// `SessionError::UndecryptableMessage` if neither path works. The cause
    /// is not reported.
    pub fn decrypt(&self, wire: &[u8], private: &PrivateKey) -> Result<Decrypted, SessionError> {
        decrypt::decrypt(self, wire, private)
    }

    /// Run one expiration pass.
    pub fn sweep(&self) -> SweepReport {
        sweeper::sweep(self)
    }

    /// Number of outbound sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tag table entries.
    pub fn tag_table_len(&self) -> usize {
        self.tags.len()
    }

    /// Counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Status of every session and received set.
    pub fn snapshot(&self) -> ManagerSnapshot {
        let now = self.env.now();

        let mut inbound: Vec<InboundSetSnapshot> = self
            .tags
            .inbound_sets()
            .iter()
            .map(|set| InboundSetSnapshot {
                id: set.id(),
                key: set.key().fingerprint(),
                size: set.size(),
                remaining: set.remaining(),
                age: elapsed(now, set.created_at()),
            })
            .collect();
        inbound.sort_by(|a, b| b.age.cmp(&a.age).then(a.id.cmp(&b.id)));

        ManagerSnapshot {
            sessions: self.sessions.snapshot(now, &self.tags),
            inbound,
            census: self.tags.census(),
            table_len: self.tags.len(),
            stats: self.stats.snapshot(),
        }
    }
}

impl<E: Environment, S, A> std::fmt::Debug for KeyManager<E, S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("tags", &self.tags.len())
            .finish_non_exhaustive()
    }
}
