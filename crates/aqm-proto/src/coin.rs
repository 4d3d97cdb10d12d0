//! Minted coin records.
//!
//! A coin is the public half of a one-time keypair plus the metadata a peer
//! needs to address a message to it. Coins are immutable once minted and are
//! identified by their key id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Tier, errors::ProtocolError};

/// Identifier of a one-time keypair, unique per owner across their entire
/// mint history.
///
/// Layout (most significant first):
///
/// ```text
/// [time seed: 40 bits][tier: 8 bits][sequence index: 16 bits]
/// ```
///
/// Uniqueness holds as long as the minter never reuses a time seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub u64);

impl KeyId {
    /// Bits reserved for the sequence index.
    const INDEX_BITS: u32 = 16;
    /// Bits reserved for the tier offset.
    const TIER_BITS: u32 = 8;
    /// Largest time seed that fits in the layout.
    pub const MAX_TIME_SEED: u64 = (1 << (64 - Self::INDEX_BITS - Self::TIER_BITS)) - 1;
    /// Distinct sequence indexes per (time seed, tier).
    pub const INDEXES_PER_TIER: u32 = 1 << Self::INDEX_BITS;

    /// Derive a key id from a time seed, tier offset and sequence index.
    ///
    /// Time seeds above [`Self::MAX_TIME_SEED`] are truncated to their low
    /// bits.
    #[must_use]
    pub const fn derive(time_seed: u64, tier: Tier, index: u16) -> Self {
        let seed = time_seed & Self::MAX_TIME_SEED;
        Self(
            (seed << (Self::INDEX_BITS + Self::TIER_BITS))
                | ((tier.to_u8() as u64) << Self::INDEX_BITS)
                | index as u64,
        )
    }

    /// Time seed component.
    #[must_use]
    pub const fn time_seed(self) -> u64 {
        self.0 >> (Self::INDEX_BITS + Self::TIER_BITS)
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian bytes, used as associated data when sealing secrets.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A minted, published one-time public key record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// Identity of the user who minted the key.
    #[serde(rename = "user")]
    pub owner: String,
    /// Key id, unique per owner.
    #[serde(rename = "kid")]
    pub key_id: KeyId,
    /// Tier the key was minted for.
    #[serde(rename = "coin")]
    pub tier: Tier,
    /// Public key bytes, lowercase hex.
    #[serde(rename = "pk")]
    pub public_key_hex: String,
    /// Binding value over the public key, lowercase hex.
    #[serde(rename = "sig")]
    pub signature_hex: String,
}

impl Coin {
    /// Check field constraints that CBOR decoding alone does not enforce.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.owner.is_empty() {
            return Err(ProtocolError::InvalidRecord {
                field: "user",
                reason: "empty owner".to_string(),
            });
        }
        if self.public_key_hex.is_empty() || !is_lower_hex(&self.public_key_hex) {
            return Err(ProtocolError::InvalidRecord {
                field: "pk",
                reason: "public key must be non-empty lowercase hex".to_string(),
            });
        }
        if self.signature_hex.is_empty() {
            return Err(ProtocolError::InvalidRecord {
                field: "sig",
                reason: "missing signature".to_string(),
            });
        }
        Ok(())
    }
}

/// True if `s` is an even-length string of lowercase hex digits.
#[must_use]
pub fn is_lower_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin() -> Coin {
        Coin {
            owner: "alice".to_string(),
            key_id: KeyId::derive(1_700_000_000, Tier::Silver, 3),
            tier: Tier::Silver,
            public_key_hex: "00ff".to_string(),
            signature_hex: "ab".to_string(),
        }
    }

    #[test]
    fn key_id_fields_do_not_overlap() {
        let a = KeyId::derive(1_700_000_000, Tier::Gold, 4);
        let b = KeyId::derive(1_700_000_000, Tier::Silver, 4);
        let c = KeyId::derive(1_700_000_001, Tier::Gold, 4);
        let d = KeyId::derive(1_700_000_000, Tier::Gold, 5);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.time_seed(), 1_700_000_000);
    }

    #[test]
    fn coin_uses_short_wire_keys() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&coin(), &mut buf).unwrap();

        let value: ciborium::Value = ciborium::de::from_reader(&buf[..]).unwrap();
        let keys: Vec<String> = value
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_text().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["user", "kid", "coin", "pk", "sig"]);
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert!(coin().validate().is_ok());

        let mut c = coin();
        c.owner.clear();
        assert!(c.validate().is_err());

        let mut c = coin();
        c.public_key_hex = "00FF".to_string();
        assert!(c.validate().is_err());

        let mut c = coin();
        c.public_key_hex = "abc".to_string();
        assert!(c.validate().is_err());

        let mut c = coin();
        c.signature_hex.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn hex_check() {
        assert!(is_lower_hex(""));
        assert!(is_lower_hex("0123456789abcdef"));
        assert!(!is_lower_hex("0g"));
        assert!(!is_lower_hex("A0"));
    }
}
