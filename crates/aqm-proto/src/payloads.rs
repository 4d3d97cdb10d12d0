//! CBOR-encoded request and response payloads.
//!
//! Each payload variant maps to exactly one opcode. Payloads are serialized
//! without a variant tag because the frame header already names the type.
//!
//! A `Publish` payload that contains a single malformed coin record fails to
//! decode as a whole; the broker never sees a partial batch.

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Coin, Frame, FrameHeader, Opcode, Packet, Tier, TierCounts,
    errors::{ProtocolError, Result},
};

/// Fetch one coin of `tier` minted by `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Owner whose inventory is queried.
    pub user: String,
    /// Requested tier.
    #[serde(rename = "coin")]
    pub tier: Tier,
}

/// Drain `user`'s mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainRequest {
    /// Mailbox owner.
    pub user: String,
}

/// Count `user`'s published coins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRequest {
    /// Inventory owner.
    pub user: String,
}

/// Result of a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    /// Records appended to the inventory.
    pub accepted: u32,
    /// Records skipped because their key id was already published.
    pub duplicates: u32,
}

/// Error payload for rejected requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Payload failed to parse or a record failed validation.
    pub const INVALID_PAYLOAD: u16 = 0x0001;
    /// A response opcode was sent as a request.
    pub const UNEXPECTED_OPCODE: u16 = 0x0002;
    /// Broker-side failure.
    pub const INTERNAL: u16 = 0x0003;

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }

    /// Create an unexpected opcode error.
    pub fn unexpected_opcode(opcode: Opcode) -> Self {
        Self {
            code: Self::UNEXPECTED_OPCODE,
            message: format!("opcode {:#04x} is not a request", opcode.to_u8()),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self { code: Self::INTERNAL, message: msg.into() }
    }
}

/// All frame payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Requests
    /// Publish a batch of coins (all or nothing).
    Publish(Vec<Coin>),
    /// Fetch a coin.
    Fetch(FetchRequest),
    /// Route a packet.
    Send(Packet),
    /// Drain a mailbox.
    Drain(DrainRequest),
    /// Count published coins.
    Count(CountRequest),

    // Responses
    /// Publish result.
    PublishAck(PublishAck),
    /// The fetched coin.
    CoinGranted(Coin),
    /// No match.
    NotFound,
    /// Packet accepted.
    SendAck,
    /// Drained packets, possibly empty.
    Mailbox(Vec<Packet>),
    /// Per-tier counts.
    Counts(TierCounts),
    /// Request rejected.
    Error(ErrorPayload),
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Publish(_) => Opcode::Publish,
            Self::Fetch(_) => Opcode::Fetch,
            Self::Send(_) => Opcode::Send,
            Self::Drain(_) => Opcode::Drain,
            Self::Count(_) => Opcode::Count,
            Self::PublishAck(_) => Opcode::PublishAck,
            Self::CoinGranted(_) => Opcode::CoinGranted,
            Self::NotFound => Opcode::NotFound,
            Self::SendAck => Opcode::SendAck,
            Self::Mailbox(_) => Opcode::Mailbox,
            Self::Counts(_) => Opcode::Counts,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the inner value (no variant tag) into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Publish(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Fetch(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Send(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Drain(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Count(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::PublishAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::CoinGranted(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::NotFound | Self::SendAck => Ok(()),
            Self::Mailbox(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Counts(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload bytes for `opcode`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if `bytes` exceed the frame limit
    /// - `ProtocolError::CborDecode` if the bytes do not match the type the
    ///   opcode names
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Publish => Self::Publish(cbor(bytes)?),
            Opcode::Fetch => Self::Fetch(cbor(bytes)?),
            Opcode::Send => Self::Send(cbor(bytes)?),
            Opcode::Drain => Self::Drain(cbor(bytes)?),
            Opcode::Count => Self::Count(cbor(bytes)?),
            Opcode::PublishAck => Self::PublishAck(cbor(bytes)?),
            Opcode::CoinGranted => Self::CoinGranted(cbor(bytes)?),
            Opcode::NotFound => Self::NotFound,
            Opcode::SendAck => Self::SendAck,
            Opcode::Mailbox => Self::Mailbox(cbor(bytes)?),
            Opcode::Counts => Self::Counts(cbor(bytes)?),
            Opcode::Error => Self::Error(cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Encode into a frame with the matching opcode.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(Frame::new(FrameHeader::new(self.opcode()), buf))
    }

    /// Decode the typed payload of `frame`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unassigned
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}

fn cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyId;

    fn coin(kid: u64, tier: Tier) -> Coin {
        Coin {
            owner: "alice".to_string(),
            key_id: KeyId(kid),
            tier,
            public_key_hex: "abcd".to_string(),
            signature_hex: "01".to_string(),
        }
    }

    #[test]
    fn publish_batch_through_frame() {
        let payload = Payload::Publish(vec![coin(1, Tier::Gold), coin(2, Tier::Bronze)]);
        let frame = payload.clone().into_frame().unwrap();

        assert_eq!(frame.header.opcode_enum(), Some(Opcode::Publish));
        assert_eq!(Payload::from_frame(&frame).unwrap(), payload);
    }

    #[test]
    fn empty_responses_have_no_body() {
        let frame = Payload::NotFound.into_frame().unwrap();
        assert_eq!(frame.header.payload_size(), 0);
        assert_eq!(Payload::from_frame(&frame).unwrap(), Payload::NotFound);
    }

    #[test]
    fn publish_with_one_bad_tier_fails_whole_batch() {
        // Second record carries tier 7.
        let good = ciborium::Value::Map(vec![
            ("user".into(), "alice".into()),
            ("kid".into(), 1u64.into()),
            ("coin".into(), 0u8.into()),
            ("pk".into(), "ab".into()),
            ("sig".into(), "cd".into()),
        ]);
        let bad = ciborium::Value::Map(vec![
            ("user".into(), "alice".into()),
            ("kid".into(), 2u64.into()),
            ("coin".into(), 7u8.into()),
            ("pk".into(), "ab".into()),
            ("sig".into(), "cd".into()),
        ]);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&ciborium::Value::Array(vec![good, bad]), &mut buf).unwrap();

        let result = Payload::decode(Opcode::Publish, &buf);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn fetch_with_missing_field_fails() {
        let value = ciborium::Value::Map(vec![("user".into(), "alice".into())]);
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&value, &mut buf).unwrap();

        assert!(Payload::decode(Opcode::Fetch, &buf).is_err());
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut frame = Payload::SendAck.into_frame().unwrap();
        frame.header.opcode = 0x42;
        assert_eq!(Payload::from_frame(&frame), Err(ProtocolError::UnknownOpcode(0x42)));
    }
}
