//! Issuance quantities per context and tier.
//!
//! Minting and replenishment read from the same table so the two never drift
//! apart.

use std::fmt;

use aqm_proto::{KeyId, Tier, TierCounts};

/// Trust bucket derived from a contact's interaction rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Fewer than [`Priority::MATE_THRESHOLD`] messages per period.
    #[default]
    Stranger,
    /// At least [`Priority::MATE_THRESHOLD`] messages per period.
    Mate,
    /// At least [`Priority::BESTIE_THRESHOLD`] messages per period.
    Bestie,
}

impl Priority {
    /// Rate at which a contact becomes a BESTIE.
    pub const BESTIE_THRESHOLD: u32 = 50;
    /// Rate at which a contact becomes a MATE.
    pub const MATE_THRESHOLD: u32 = 5;

    /// Map an interaction rate to a priority. Monotone in `rate`.
    #[must_use]
    pub const fn from_rate(rate: u32) -> Self {
        if rate >= Self::BESTIE_THRESHOLD {
            Self::Bestie
        } else if rate >= Self::MATE_THRESHOLD {
            Self::Mate
        } else {
            Self::Stranger
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stranger => "STRANGER",
            Self::Mate => "MATE",
            Self::Bestie => "BESTIE",
        };
        f.write_str(name)
    }
}

/// Why coins are being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueContext {
    /// Our own periodic mint batch.
    Mint,
    /// Fetching a contact's coins after a priority recomputation.
    Replenish(Priority),
}

/// Quantity table keyed by (context, tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuancePolicy {
    mint: TierCounts,
    bestie: TierCounts,
    mate: TierCounts,
    stranger: TierCounts,
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self {
            mint: TierCounts::new(5, 5, 5),
            bestie: TierCounts::new(5, 4, 1),
            mate: TierCounts::new(0, 6, 4),
            stranger: TierCounts::new(0, 0, 0),
        }
    }
}

impl IssuancePolicy {
    /// Override the mint batch sizes.
    ///
    /// Each tier is clamped to [`KeyId::INDEXES_PER_TIER`], the number of
    /// distinct key ids one mint seed can produce for a tier.
    #[must_use]
    pub fn with_mint(mut self, counts: TierCounts) -> Self {
        let max = KeyId::INDEXES_PER_TIER;
        let clamped = TierCounts::new(
            counts.gold.min(max),
            counts.silver.min(max),
            counts.bronze.min(max),
        );
        if clamped != counts {
            tracing::warn!(?counts, max, "mint quantity clamped to key id space");
        }
        self.mint = clamped;
        self
    }

    /// Override the replenishment target for one priority.
    #[must_use]
    pub fn with_replenish(mut self, priority: Priority, counts: TierCounts) -> Self {
        match priority {
            Priority::Bestie => self.bestie = counts,
            Priority::Mate => self.mate = counts,
            Priority::Stranger => self.stranger = counts,
        }
        self
    }

    /// Per-tier targets for `context`.
    #[must_use]
    pub const fn targets(&self, context: IssueContext) -> TierCounts {
        match context {
            IssueContext::Mint => self.mint,
            IssueContext::Replenish(Priority::Bestie) => self.bestie,
            IssueContext::Replenish(Priority::Mate) => self.mate,
            IssueContext::Replenish(Priority::Stranger) => self.stranger,
        }
    }

    /// Quantity of `tier` for `context`.
    #[must_use]
    pub const fn quantity(&self, context: IssueContext, tier: Tier) -> u32 {
        self.targets(context).get(tier)
    }
}
