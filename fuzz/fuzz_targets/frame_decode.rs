//! Fuzz target for Frame::decode
//!
//! Arbitrary bytes must never panic the envelope parser. Anything that does
//! decode must re-encode to the same bytes it was read from.

#![no_main]

use aqm_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let mut out = Vec::new();
    frame.encode(&mut out).expect("decoded frame must re-encode");
    assert_eq!(&out[..], &data[..out.len()], "re-encoded frame differs from input");
});
