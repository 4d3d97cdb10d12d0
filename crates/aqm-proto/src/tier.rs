//! Coin tiers.
//!
//! The tier decides both the key-generation algorithm class and how many
//! coins of that class are minted or requested. Tiers are encoded on the
//! wire as fixed integers: GOLD=0, SILVER=1, BRONZE=2.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Trust/quality class of a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    /// Post-quantum KEM, reserved for the closest contacts.
    Gold = 0,
    /// Post-quantum KEM.
    Silver = 1,
    /// Classical elliptic-curve key.
    Bronze = 2,
}

impl Tier {
    /// All tiers in wire order.
    pub const ALL: [Tier; 3] = [Tier::Gold, Tier::Silver, Tier::Bronze];

    /// Wire integer for this tier.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire integer.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Gold),
            1 => Some(Self::Silver),
            2 => Some(Self::Bronze),
            _ => None,
        }
    }

    /// Lower tiers to try, in order, when this one is exhausted.
    #[must_use]
    pub const fn fallbacks(self) -> &'static [Tier] {
        match self {
            Self::Gold => &[Tier::Silver, Tier::Bronze],
            Self::Silver => &[Tier::Bronze],
            Self::Bronze => &[],
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(ProtocolError::InvalidTier(value))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.to_u8()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gold => "GOLD",
            Self::Silver => "SILVER",
            Self::Bronze => "BRONZE",
        };
        f.write_str(name)
    }
}

/// Per-tier coin counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    /// GOLD coins
    pub gold: u32,
    /// SILVER coins
    pub silver: u32,
    /// BRONZE coins
    pub bronze: u32,
}

impl TierCounts {
    /// Build from explicit per-tier values.
    #[must_use]
    pub const fn new(gold: u32, silver: u32, bronze: u32) -> Self {
        Self { gold, silver, bronze }
    }

    /// Count for one tier.
    #[must_use]
    pub const fn get(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Gold => self.gold,
            Tier::Silver => self.silver,
            Tier::Bronze => self.bronze,
        }
    }

    /// Increment the count for one tier.
    pub fn add(&mut self, tier: Tier, n: u32) {
        match tier {
            Tier::Gold => self.gold += n,
            Tier::Silver => self.silver += n,
            Tier::Bronze => self.bronze += n,
        }
    }

    /// Sum over all tiers.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.gold + self.silver + self.bronze
    }
}
