//! Fuzz target for the inner frame codec.
//!
//! Arbitrary bytes go through `Frame::decode` and `decode_bootstrap`. Neither
//! may panic. A frame that decodes must survive a re-encode (with and
//! without padding) unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sealtag_core::{Frame, wire};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let bare = frame.encode(0, |_| {}).expect("decoded frame re-encodes");
        assert_eq!(Frame::decode(&bare).expect("re-encoded frame decodes"), frame);

        let padded = frame.encode(bare.len() + 64, |fill| fill.fill(0xA5)).expect("padded encode");
        assert_eq!(Frame::decode(&padded).expect("padded frame decodes"), frame);
    }

    if let Ok((_key, _iv, rest)) = wire::decode_bootstrap(data) {
        let _ = Frame::decode(rest);
    }
});
