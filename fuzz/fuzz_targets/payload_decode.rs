//! Fuzz target for Payload::from_frame
//!
//! Feeds arbitrary CBOR bodies under every assigned opcode:
//! - Malformed CBOR
//! - Type confusion (body of one opcode under another)
//! - Records that decode but violate field constraints
//!
//! Decoding must return an error, never panic.

#![no_main]

use aqm_proto::{Frame, FrameHeader, Opcode, Payload};
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

const OPCODES: [Opcode; 12] = [
    Opcode::Publish,
    Opcode::Fetch,
    Opcode::Send,
    Opcode::Drain,
    Opcode::Count,
    Opcode::PublishAck,
    Opcode::CoinGranted,
    Opcode::NotFound,
    Opcode::SendAck,
    Opcode::Mailbox,
    Opcode::Counts,
    Opcode::Error,
];

fuzz_target!(|data: &[u8]| {
    for opcode in OPCODES {
        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));
        if let Ok(payload) = Payload::from_frame(&frame) {
            assert_eq!(payload.opcode(), opcode);
        }
    }
});
