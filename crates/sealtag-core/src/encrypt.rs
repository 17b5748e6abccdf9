//! Encryption engine.
//!
//! Picks the tag path when an ACKED tag is available for the destination's
//! current key and falls back to the asymmetric bootstrap otherwise. Either
//! way the message may carry a fresh batch of tags (and, during a rekey, the
//! next key) inside the encrypted frame.
//!
//! Minting policy, checked before every message:
//!
//! 1. An offered next key with no PENDING set in flight is re-offered
//! 2. A current key older than `max_key_age`, with no offer outstanding,
//!    starts a rekey under a fresh key
//! 3. Otherwise a batch under the current key is minted when ACKED plus
//!    in-flight tags fall below `low_water_mark`
//!
//! The tag is taken and the minted tags are recorded as delivered only after
//! the ciphertext was built, so a cipher failure changes nothing. A batch
//! planned under a key that a concurrent ack rotated away still rides along
//! but is not recorded.

use sealtag_crypto::{
    ASYM_RANDOMNESS_SIZE, AsymmetricCipher, Iv, PublicKey, SessionKey, SymmetricCipher,
};

use crate::{
    config::KeyManagerConfig,
    env::Environment,
    error::SessionError,
    manager::KeyManager,
    session::SendState,
    stats::Counter,
    tag::{Tag, mint_tags},
    tag_set::TagSetHandle,
    wire::{self, Frame},
};

/// Which path a message took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    /// `tag || iv || symmetric ciphertext`
    Tag,
    /// Asymmetric ciphertext of the bootstrap blob
    Asymmetric,
}

/// Tags that rode along with a message and now wait for the peer's ack.
#[derive(Debug, Clone)]
pub struct DeliveredTags {
    /// Destination
    pub target: PublicKey,
    /// Key the tags are bound to
    pub key: SessionKey,
    /// PENDING set to ack or fail
    pub handle: TagSetHandle,
    /// Number of tags
    pub count: usize,
    /// The batch offers a new key
    pub rekey: bool,
}

/// An encrypted message.
#[derive(Debug, Clone)]
pub struct Encrypted {
    /// Bytes to put on the wire
    pub wire: Vec<u8>,
    /// Path taken
    pub path: DeliveryPath,
    /// Tags delivered with this message, if any
    pub delivered: Option<DeliveredTags>,
}

struct Batch {
    key: SessionKey,
    tags: Vec<Tag>,
    rekey: bool,
}

fn plan_batch<E: Environment>(
    env: &E,
    config: &KeyManagerConfig,
    state: &SendState,
) -> Option<Batch> {
    let low = state.available + state.in_flight < config.low_water_mark;

    let (key, rekey) = match &state.next {
        Some(next) if !state.next_in_flight => (next.clone(), true),
        None if state.key_age >= config.max_key_age => {
            (SessionKey::from_bytes(env.random_array()), true)
        },
        _ if low => (state.current.clone(), false),
        _ => return None,
    };

    Some(Batch { key, tags: mint_tags(env, config.tag_batch_size), rekey })
}

pub(crate) fn encrypt<E, S, A>(
    mgr: &KeyManager<E, S, A>,
    payload: &[u8],
    target: &PublicKey,
    padding_size: usize,
) -> Result<Encrypted, SessionError>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    mgr.create_session(target)?;

    let env = mgr.env();
    let now = env.now();
    let lifetime = mgr.config().outbound_tag_lifetime;
    let state = mgr
        .sessions
        .send_state(target, now, lifetime)
        .ok_or(SessionError::SessionNotFound { target: *target })?;

    let batch = plan_batch(env, mgr.config(), &state);

    let frame = Frame {
        new_tags: batch.as_ref().map(|b| b.tags.clone()).unwrap_or_default(),
        new_key: batch.as_ref().filter(|b| b.rekey).map(|b| b.key.clone()),
        payload: payload.to_vec(),
    };
    let frame = frame.encode(padding_size, |filler| env.random_bytes(filler))?;
    let iv: Iv = env.random_array();

    // Seal before taking a tag so a cipher failure leaves the session as it was
    let sealed = if state.available > 0 {
        Some(mgr.symmetric.encrypt(&state.current, &iv, &frame)?)
    } else {
        None
    };
    let tag = sealed.as_ref().and_then(|_| {
        mgr.sessions.consume_next_available_tag(target, &state.current, now, lifetime, &mgr.tags)
    });

    let (wire, path) = match (tag, sealed) {
        (Some(tag), Some(ciphertext)) => {
            mgr.stats.incr(Counter::EncryptExistingSession);
            (wire::encode_tagged(&tag, &iv, &ciphertext), DeliveryPath::Tag)
        },
        _ => {
            let blob = wire::encode_bootstrap(&state.current, &iv, &frame);
            let randomness: [u8; ASYM_RANDOMNESS_SIZE] = env.random_array();
            let ciphertext = mgr.asymmetric.encrypt(target, &blob, &randomness)?;
            mgr.stats.incr(Counter::EncryptNewSession);
            (ciphertext, DeliveryPath::Asymmetric)
        },
    };

    let delivered = match batch {
        Some(Batch { key, tags, rekey }) => {
            let count = tags.len();
            mgr.sessions
                .deliver_planned(target, &state.current, key.clone(), tags, now)?
                .map(|handle| DeliveredTags { target: *target, key, handle, count, rekey })
        },
        None => None,
    };

    tracing::debug!(
        peer = %target,
        ?path,
        len = wire.len(),
        new_tags = delivered.as_ref().map_or(0, |d| d.count),
        "message encrypted"
    );

    Ok(Encrypted { wire, path, delivered })
}
