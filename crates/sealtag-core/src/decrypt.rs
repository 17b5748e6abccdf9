//! Decryption engine.
//!
//! ```text
//! RECEIVED -> tag hit  -> DECRYPTED
//!          -> tag miss -> ASYM_ATTEMPT -> DECRYPTED
//!                                      -> REJECTED
//! ```
//!
//! A tag hit whose ciphertext does not open (a message that merely starts with
//! a known tag) falls through to the asymmetric attempt. The tag stays
//! consumed. Every rejection looks the same to the caller.

use sealtag_crypto::{AsymmetricCipher, Iv, PrivateKey, SessionKey, SymmetricCipher};

use crate::{
    encrypt::DeliveryPath,
    env::Environment,
    error::SessionError,
    manager::KeyManager,
    stats::Counter,
    wire::{self, Frame},
};

/// A decrypted message.
#[derive(Debug, Clone)]
pub struct Decrypted {
    /// Application payload
    pub payload: Vec<u8>,
    /// Path the message arrived on
    pub path: DeliveryPath,
    /// Session key the message was encrypted under
    pub key: SessionKey,
    /// New tags registered from the frame
    pub new_tags: usize,
    /// The frame carried a new key
    pub new_key: bool,
}

pub(crate) fn decrypt<E, S, A>(
    mgr: &KeyManager<E, S, A>,
    wire: &[u8],
    private: &PrivateKey,
) -> Result<Decrypted, SessionError>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    if let Some(decrypted) = try_tag_path(mgr, wire) {
        mgr.stats.incr(Counter::DecryptExistingSession);
        return Ok(decrypted);
    }

    match open_bootstrap(mgr, wire, private) {
        Ok((key, frame)) => {
            mgr.stats.incr(Counter::DecryptNewSession);
            Ok(accept(mgr, key, frame, DeliveryPath::Asymmetric))
        },
        Err(err) => {
            mgr.stats.incr(Counter::DecryptFailed);
            tracing::debug!(len = wire.len(), reason = %err, "dropping undecryptable message");
            Err(SessionError::UndecryptableMessage)
        },
    }
}

fn try_tag_path<E, S, A>(mgr: &KeyManager<E, S, A>, wire: &[u8]) -> Option<Decrypted>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let (tag, iv, ciphertext) = wire::split_tagged(wire)?;

    let Some(key) = mgr.consume_tag(&tag) else {
        tracing::debug!(?tag, "tag miss");
        return None;
    };

    match open_tagged(mgr, &key, &iv, ciphertext) {
        Ok(frame) => {
            tracing::debug!(?tag, "tag hit");
            Some(accept(mgr, key, frame, DeliveryPath::Tag))
        },
        Err(err) => {
            tracing::debug!(?tag, reason = %err, "tag hit did not decrypt");
            None
        },
    }
}

fn open_tagged<E, S, A>(
    mgr: &KeyManager<E, S, A>,
    key: &SessionKey,
    iv: &Iv,
    ciphertext: &[u8],
) -> Result<Frame, SessionError>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let plaintext = mgr.symmetric.decrypt(key, iv, ciphertext)?;
    Ok(Frame::decode(&plaintext)?)
}

fn open_bootstrap<E, S, A>(
    mgr: &KeyManager<E, S, A>,
    wire: &[u8],
    private: &PrivateKey,
) -> Result<(SessionKey, Frame), SessionError>
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let blob = mgr.asymmetric.decrypt(private, wire)?;
    let (key, _iv, frame) = wire::decode_bootstrap(&blob)?;
    Ok((key, Frame::decode(frame)?))
}

fn accept<E, S, A>(
    mgr: &KeyManager<E, S, A>,
    key: SessionKey,
    frame: Frame,
    path: DeliveryPath,
) -> Decrypted
where
    E: Environment,
    S: SymmetricCipher,
    A: AsymmetricCipher,
{
    let Frame { new_tags, new_key, payload } = frame;
    let count = new_tags.len();
    let carried_key = new_key.is_some();

    if count > 0 {
        let bound = new_key.unwrap_or_else(|| key.clone());
        mgr.tags_received(bound, new_tags);
    }

    Decrypted { payload, path, key, new_tags: count, new_key: carried_key }
}
