//! Wire formats.
//!
//! Tag path (the whole message):
//!
//! ```text
//! tag (32) || iv (16) || sym_ciphertext
//! ```
//!
//! Asymmetric path: `asym_ciphertext` wrapping the bootstrap blob
//!
//! ```text
//! session_key (32) || iv (16) || frame
//! ```
//!
//! Both paths carry the same inner [`Frame`]:
//!
//! ```text
//! count    u8                     new tags that follow
//! tags     count * 32
//! flags    u8                     0x01 new key, 0x02 explicit length
//! new_key  32                     if 0x01
//! length   u32 big-endian         if 0x02
//! payload
//! filler                          if 0x02, random, pads the frame
//! ```

use sealtag_crypto::{BLOCK_SIZE, IV_SIZE, Iv, SESSION_KEY_SIZE, SessionKey};
use thiserror::Error;

use crate::tag::{TAG_SIZE, Tag};

/// Frame carries a new session key.
pub const FLAG_NEW_KEY: u8 = 0x01;

/// Frame carries an explicit payload length followed by filler.
pub const FLAG_EXPLICIT_LENGTH: u8 = 0x02;

const KNOWN_FLAGS: u8 = FLAG_NEW_KEY | FLAG_EXPLICIT_LENGTH;

/// Most tags a frame can carry.
pub const MAX_FRAME_TAGS: usize = u8::MAX as usize;

/// Smallest message that can be on the tag path: one tag, one IV and one
/// cipher block.
pub const MIN_TAGGED_LEN: usize = TAG_SIZE + IV_SIZE + BLOCK_SIZE;

/// Bootstrap blob header length.
pub const BOOTSTRAP_HEADER_LEN: usize = SESSION_KEY_SIZE + IV_SIZE;

/// Frame codec errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before a fixed-size field
    #[error("truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to continue
        needed: usize,
        /// Bytes left
        available: usize,
    },

    /// Flags byte has bits this codec does not know
    #[error("unknown frame flags: {0:#04x}")]
    UnknownFlags(u8),

    /// Declared payload length runs past the end of the frame
    #[error("payload length {declared} exceeds remaining {available} bytes")]
    LengthOverrun {
        /// Length from the frame
        declared: usize,
        /// Bytes actually left
        available: usize,
    },

    /// More tags than the count byte can express
    #[error("too many tags for one frame: {0}")]
    TooManyTags(usize),

    /// Payload length does not fit the length field
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Inner plaintext of every message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Tags the sender offers for its future messages
    pub new_tags: Vec<Tag>,
    /// Key the new tags are bound to (rekey); `None` means the message key
    pub new_key: Option<SessionKey>,
    /// Application payload
    pub payload: Vec<u8>,
}

impl Frame {
    /// Frame carrying only a payload.
    pub fn payload_only(payload: &[u8]) -> Self {
        Self { new_tags: Vec::new(), new_key: None, payload: payload.to_vec() }
    }

    /// Encode, padding the frame to at least `padding_size` bytes.
    ///
    /// Padding switches on the explicit length flag. `fill` supplies the filler
    /// bytes.
    ///
    /// # Errors
    ///
    /// - `WireError::TooManyTags` above 255 tags
    /// - `WireError::PayloadTooLarge` if padding is requested and the payload
    ///   does not fit a `u32`
    pub fn encode(
        &self,
        padding_size: usize,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<Vec<u8>, WireError> {
        let count = u8::try_from(self.new_tags.len())
            .map_err(|_| WireError::TooManyTags(self.new_tags.len()))?;

        let key_len = if self.new_key.is_some() { SESSION_KEY_SIZE } else { 0 };
        let bare_len = 2 + self.new_tags.len() * TAG_SIZE + key_len + self.payload.len();
        let padded = padding_size > bare_len;

        let mut flags = 0u8;
        if self.new_key.is_some() {
            flags |= FLAG_NEW_KEY;
        }
        if padded {
            flags |= FLAG_EXPLICIT_LENGTH;
        }

        let mut out = Vec::with_capacity(bare_len.max(padding_size) + 4);
        out.push(count);
        for tag in &self.new_tags {
            out.extend_from_slice(tag.as_bytes());
        }
        out.push(flags);
        if let Some(key) = &self.new_key {
            out.extend_from_slice(key.as_bytes());
        }
        if padded {
            let len = u32::try_from(self.payload.len())
                .map_err(|_| WireError::PayloadTooLarge(self.payload.len()))?;
            out.extend_from_slice(&len.to_be_bytes());
        }
        out.extend_from_slice(&self.payload);

        if padded && out.len() < padding_size {
            let start = out.len();
            out.resize(padding_size, 0);
            fill(&mut out[start..]);
        }

        Ok(out)
    }

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// - `WireError::Truncated` if the count, tags, flags, key or length field
    ///   is cut short
    /// - `WireError::UnknownFlags` for unknown flag bits
    /// - `WireError::LengthOverrun` if the explicit length runs past the end
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);

        let count = usize::from(reader.byte()?);
        let mut new_tags = Vec::with_capacity(count);
        for _ in 0..count {
            let mut tag = [0u8; TAG_SIZE];
            tag.copy_from_slice(reader.take(TAG_SIZE)?);
            new_tags.push(Tag::from_bytes(tag));
        }

        let flags = reader.byte()?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(WireError::UnknownFlags(flags));
        }

        let new_key = if flags & FLAG_NEW_KEY != 0 {
            let mut key = [0u8; SESSION_KEY_SIZE];
            key.copy_from_slice(reader.take(SESSION_KEY_SIZE)?);
            Some(SessionKey::from_bytes(key))
        } else {
            None
        };

        let payload = if flags & FLAG_EXPLICIT_LENGTH != 0 {
            let mut len = [0u8; 4];
            len.copy_from_slice(reader.take(4)?);
            let declared = u32::from_be_bytes(len) as usize;
            let available = reader.remaining();
            if declared > available {
                return Err(WireError::LengthOverrun { declared, available });
            }
            reader.take(declared)?.to_vec()
        } else {
            reader.rest().to_vec()
        };

        Ok(Self { new_tags, new_key, payload })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.bytes.len() < n {
            return Err(WireError::Truncated { needed: n, available: self.bytes.len() });
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, WireError> {
        let (&byte, tail) = self
            .bytes
            .split_first()
            .ok_or(WireError::Truncated { needed: 1, available: 0 })?;
        self.bytes = tail;
        Ok(byte)
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn rest(self) -> &'a [u8] {
        self.bytes
    }
}

/// Assemble a tag-path message.
pub fn encode_tagged(tag: &Tag, iv: &Iv, ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TAG_SIZE + IV_SIZE + ciphertext.len());
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(iv);
    out.extend_from_slice(ciphertext);
    out
}

/// Split a message into tag candidate, IV and ciphertext.
///
/// `None` if the message is too short to be on the tag path.
pub fn split_tagged(wire: &[u8]) -> Option<(Tag, Iv, &[u8])> {
    if wire.len() < MIN_TAGGED_LEN {
        return None;
    }

    let tag = Tag::from_prefix(wire)?;
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&wire[TAG_SIZE..TAG_SIZE + IV_SIZE]);
    Some((tag, iv, &wire[TAG_SIZE + IV_SIZE..]))
}

/// Assemble the plaintext of an asymmetric-path message.
pub fn encode_bootstrap(key: &SessionKey, iv: &Iv, frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BOOTSTRAP_HEADER_LEN + frame.len());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(iv);
    out.extend_from_slice(frame);
    out
}

/// Split an asymmetric-path plaintext into key, IV and frame bytes.
///
/// # Errors
///
/// `WireError::Truncated` if the blob is shorter than key plus IV.
pub fn decode_bootstrap(blob: &[u8]) -> Result<(SessionKey, Iv, &[u8]), WireError> {
    let mut reader = Reader::new(blob);

    let mut key = [0u8; SESSION_KEY_SIZE];
    key.copy_from_slice(reader.take(SESSION_KEY_SIZE)?);
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(reader.take(IV_SIZE)?);

    Ok((SessionKey::from_bytes(key), iv, reader.rest()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn no_fill(_: &mut [u8]) {}

    fn tags(n: u8) -> Vec<Tag> {
        (0..n).map(|i| Tag::from_bytes([i; TAG_SIZE])).collect()
    }

    #[test]
    fn payload_only_frame_is_two_bytes_of_overhead() {
        let frame = Frame::payload_only(b"msg2");
        let bytes = frame.encode(0, no_fill).unwrap();

        assert_eq!(bytes, [&[0u8, 0u8][..], b"msg2"].concat());
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn frame_with_tags_and_key_decodes() {
        let frame = Frame {
            new_tags: tags(3),
            new_key: Some(SessionKey::from_bytes([9; 32])),
            payload: b"rekey".to_vec(),
        };
        let bytes = frame.encode(0, no_fill).unwrap();

        assert_eq!(bytes.len(), 1 + 3 * TAG_SIZE + 1 + SESSION_KEY_SIZE + 5);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn padding_hides_payload_length() {
        let frame = Frame::payload_only(b"hi");
        let bytes = frame.encode(64, |buf| buf.fill(0xEE)).unwrap();

        assert_eq!(bytes.len(), 64);
        assert_eq!(bytes[1], FLAG_EXPLICIT_LENGTH);
        assert_eq!(*bytes.last().unwrap(), 0xEE);
        assert_eq!(Frame::decode(&bytes).unwrap().payload, b"hi");
    }

    #[test]
    fn padding_smaller_than_frame_is_ignored() {
        let frame = Frame::payload_only(b"a longer payload");
        let bytes = frame.encode(4, no_fill).unwrap();

        assert_eq!(bytes[1], 0);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn too_many_tags_is_rejected() {
        let frame = Frame {
            new_tags: vec![Tag::from_bytes([1; TAG_SIZE]); 256],
            ..Frame::default()
        };
        assert_eq!(frame.encode(0, no_fill), Err(WireError::TooManyTags(256)));
    }

    #[test]
    fn truncated_tags_are_rejected() {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&[0u8; TAG_SIZE + 5]);

        assert!(matches!(Frame::decode(&bytes), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn empty_input_is_truncated() {
        assert_eq!(Frame::decode(&[]), Err(WireError::Truncated { needed: 1, available: 0 }));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert_eq!(Frame::decode(&[0, 0x04, 1, 2]), Err(WireError::UnknownFlags(0x04)));
    }

    #[test]
    fn length_overrun_is_rejected() {
        let mut bytes = vec![0u8, FLAG_EXPLICIT_LENGTH];
        bytes.extend_from_slice(&100u32.to_be_bytes());
        bytes.extend_from_slice(b"short");

        assert_eq!(
            Frame::decode(&bytes),
            Err(WireError::LengthOverrun { declared: 100, available: 5 })
        );
    }

    #[test]
    fn tagged_split_requires_one_block() {
        assert!(split_tagged(&[0u8; MIN_TAGGED_LEN - 1]).is_none());

        let wire = encode_tagged(&Tag::from_bytes([1; 32]), &[2; 16], &[3; 16]);
        let (tag, iv, ciphertext) = split_tagged(&wire).unwrap();
        assert_eq!(tag, Tag::from_bytes([1; 32]));
        assert_eq!(iv, [2; 16]);
        assert_eq!(ciphertext, &[3; 16]);
    }

    #[test]
    fn bootstrap_blob_splits() {
        let key = SessionKey::from_bytes([4; 32]);
        let blob = encode_bootstrap(&key, &[5; 16], b"frame");

        let (parsed, iv, frame) = decode_bootstrap(&blob).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(iv, [5; 16]);
        assert_eq!(frame, b"frame");

        assert!(decode_bootstrap(&blob[..40]).is_err());
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = Frame::decode(&bytes);
        }

        #[test]
        fn padding_hides_length_but_not_payload(
            tag_count in 0u8..8,
            payload in prop::collection::vec(any::<u8>(), 0..256),
            padding_size in 0usize..512,
        ) {
            let frame = Frame { new_tags: tags(tag_count), new_key: None, payload };
            let bytes = frame.encode(padding_size, |fill| fill.fill(0xEE)).unwrap();

            prop_assert!(bytes.len() >= padding_size);
            prop_assert_eq!(Frame::decode(&bytes).unwrap(), frame);
        }
    }
}
