//! Packets addressed to a one-time coin.

use serde::{Deserialize, Serialize};

use crate::{FrameHeader, KeyId, Tier, coin::is_lower_hex, errors::ProtocolError};

/// Largest CBOR array header in front of a mailbox reply.
const ARRAY_HEADER_MAX: usize = 9;

/// One in-flight message addressed to a specific one-time coin.
///
/// The broker routes packets by `recipient` only; it never looks at the key
/// material. A packet is delivered exactly once per mailbox drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Recipient identity.
    #[serde(rename = "to")]
    pub recipient: String,
    /// Key id of the coin the sender used.
    #[serde(rename = "kid")]
    pub key_id: KeyId,
    /// Tier of that coin.
    #[serde(rename = "coin")]
    pub tier: Tier,
    /// Encapsulated key block, lowercase hex.
    #[serde(rename = "ct")]
    pub ciphertext_hex: String,
    /// Message body.
    pub payload: String,
    /// Nonce, lowercase hex.
    #[serde(rename = "iv")]
    pub nonce_hex: String,
}

impl Packet {
    /// Bytes of encoded packets one mailbox reply may carry.
    ///
    /// A single packet never exceeds this, so every queued packet fits in
    /// some reply frame.
    pub const MAILBOX_BUDGET: usize = FrameHeader::MAX_PAYLOAD_SIZE as usize - ARRAY_HEADER_MAX;

    /// Length of this packet's CBOR encoding.
    pub fn encoded_len(&self) -> Result<usize, ProtocolError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf.len())
    }

    /// Check field constraints that CBOR decoding alone does not enforce.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.recipient.is_empty() {
            return Err(ProtocolError::InvalidRecord {
                field: "to",
                reason: "empty recipient".to_string(),
            });
        }
        if !is_lower_hex(&self.ciphertext_hex) {
            return Err(ProtocolError::InvalidRecord {
                field: "ct",
                reason: "ciphertext must be lowercase hex".to_string(),
            });
        }
        if !is_lower_hex(&self.nonce_hex) {
            return Err(ProtocolError::InvalidRecord {
                field: "iv",
                reason: "nonce must be lowercase hex".to_string(),
            });
        }
        let size = self.encoded_len()?;
        if size > Self::MAILBOX_BUDGET {
            return Err(ProtocolError::PayloadTooLarge { size, max: Self::MAILBOX_BUDGET });
        }
        Ok(())
    }
}
