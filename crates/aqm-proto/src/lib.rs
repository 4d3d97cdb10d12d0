//! AQM wire protocol.
//!
//! Data model shared by clients and the broker (tiers, key ids, coins,
//! packets) and the envelope used to carry one request or response over a
//! QUIC stream.
//!
//! # Wire format
//!
//! ```text
//! [FrameHeader: 12 bytes, raw binary] + [payload: CBOR]
//! ```
//!
//! The header opcode identifies the payload type, so payloads are encoded
//! without a variant tag. Field names inside the CBOR maps are the short wire
//! keys (`user`, `kid`, `coin`, `pk`, `sig` for coins; `to`, `kid`, `coin`,
//! `ct`, `payload`, `iv` for packets). All binary key and ciphertext material
//! travels as lowercase hexadecimal text.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod coin;
pub mod errors;
pub mod frame;
pub mod header;
pub mod packet;
pub mod payloads;
pub mod tier;

pub use coin::{Coin, KeyId, is_lower_hex};
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::{FrameHeader, Opcode};
pub use packet::Packet;
pub use payloads::{
    CountRequest, DrainRequest, ErrorPayload, FetchRequest, Payload, PublishAck,
};
pub use tier::{Tier, TierCounts};

/// ALPN protocol identifier negotiated by client and broker.
pub const ALPN_PROTOCOL: &[u8] = b"aqm";
