//! Per-contact interaction tracking and coin replenishment.
//!
//! Every interaction observation recomputes the contact's priority and then
//! requests the full per-tier target for that priority from the broker, one
//! fetch per unit. There is no top-up arithmetic against existing stock and
//! no retry: a failed fetch is logged and the next maintenance cycle picks up
//! the shortfall.

use std::{collections::HashMap, sync::Arc, time::Duration};

use aqm_proto::{Tier, TierCounts};
use thiserror::Error;

use crate::{
    BrokerRpc, Environment, Inventory,
    policy::{IssuancePolicy, IssueContext, Priority},
};

/// Ledger errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No interaction was ever recorded for this user.
    #[error("contact not registered: {0}")]
    ContactNotRegistered(String),
}

/// What the ledger knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Peer identity.
    pub user: String,
    /// Most recent interaction rate (messages per period).
    pub rate: u32,
    /// Priority derived from `rate`.
    pub priority: Priority,
    /// Coins of this peer currently in our cache.
    pub held: TierCounts,
    /// Wall clock seconds of the last observation.
    pub last_seen: u64,
}

/// Outcome of one replenishment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Replenishment {
    /// Priority after recomputation.
    pub priority: Priority,
    /// Units requested per tier.
    pub requested: TierCounts,
    /// Units the broker actually dispensed per tier.
    pub obtained: TierCounts,
}

/// Result of a garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Contacts demoted to STRANGER.
    pub contacts_demoted: usize,
    /// Cached coins dropped.
    pub coins_purged: usize,
}

/// Tracks contacts and keeps their coins stocked.
///
/// Shares the [`Inventory`] with the rest of the client. The inventory lives
/// as long as any clone of it, so it outlives the ledger.
pub struct ContactLedger<R, E> {
    inventory: Inventory,
    rpc: Arc<R>,
    env: E,
    policy: IssuancePolicy,
    contacts: HashMap<String, Contact>,
}

impl<R: BrokerRpc, E: Environment> ContactLedger<R, E> {
    /// Create a ledger with the default issuance table.
    pub fn new(inventory: Inventory, rpc: Arc<R>, env: E) -> Self {
        Self::with_policy(inventory, rpc, env, IssuancePolicy::default())
    }

    /// Create a ledger with a custom issuance table.
    pub fn with_policy(inventory: Inventory, rpc: Arc<R>, env: E, policy: IssuancePolicy) -> Self {
        Self { inventory, rpc, env, policy, contacts: HashMap::new() }
    }

    /// Record an interaction rate for `user` and replenish their coins.
    ///
    /// Issues one sequential `fetch` per unit of the priority's target.
    pub async fn update_interaction(&mut self, user: &str, msg_count: u32) -> Replenishment {
        let now = self.env.wall_clock_secs();
        let priority = Priority::from_rate(msg_count);

        let contact = self.contacts.entry(user.to_string()).or_insert_with(|| Contact {
            user: user.to_string(),
            rate: 0,
            priority: Priority::Stranger,
            held: TierCounts::default(),
            last_seen: now,
        });
        if contact.priority != priority {
            tracing::info!(user, from = %contact.priority, to = %priority, "contact priority changed");
        }
        contact.rate = msg_count;
        contact.priority = priority;
        contact.last_seen = now;

        let requested = self.policy.targets(IssueContext::Replenish(priority));
        let mut obtained = TierCounts::default();
        for tier in Tier::ALL {
            for _ in 0..requested.get(tier) {
                if self.fetch_key(user, tier).await {
                    obtained.add(tier, 1);
                }
            }
        }

        let held = self.inventory.tier_counts(user);
        if let Some(contact) = self.contacts.get_mut(user) {
            contact.held = held;
        }

        tracing::debug!(
            user,
            %priority,
            requested = requested.total(),
            obtained = obtained.total(),
            "replenishment finished"
        );

        Replenishment { priority, requested, obtained }
    }

    /// Fetch one coin of `tier` for `user` into the cache.
    ///
    /// Returns true if a coin was obtained. Not-found and transport errors
    /// are logged and swallowed.
    pub async fn fetch_key(&self, user: &str, tier: Tier) -> bool {
        match self.rpc.fetch(user, tier).await {
            Ok(Some(coin)) if coin.owner == user && coin.tier == tier => {
                let key_id = coin.key_id;
                let outcome = self.inventory.store_public_key(coin);
                tracing::trace!(user, %tier, %key_id, ?outcome, "cached fetched coin");
                true
            },
            Ok(Some(coin)) => {
                tracing::warn!(
                    user,
                    %tier,
                    got_owner = %coin.owner,
                    got_tier = %coin.tier,
                    "broker returned a coin that does not match the request"
                );
                false
            },
            Ok(None) => {
                tracing::debug!(user, %tier, "no coin available");
                false
            },
            Err(e) => {
                tracing::warn!(user, %tier, error = %e, "fetch failed");
                false
            },
        }
    }

    /// Demote contacts idle for longer than `max_idle` and drop their coins.
    pub fn collect_inactive(&mut self, max_idle: Duration) -> GcReport {
        let now = self.env.wall_clock_secs();
        let idle: Vec<String> = self
            .contacts
            .values()
            .filter(|c| now.saturating_sub(c.last_seen) > max_idle.as_secs())
            .filter(|c| c.priority != Priority::Stranger || c.held.total() > 0)
            .map(|c| c.user.clone())
            .collect();

        let mut report = GcReport::default();
        for user in idle {
            report.coins_purged += self.demote(&user);
            report.contacts_demoted += 1;
        }

        if report.contacts_demoted > 0 {
            tracing::info!(
                demoted = report.contacts_demoted,
                purged = report.coins_purged,
                "collected inactive contacts"
            );
        }
        report
    }

    /// Demote one contact and drop its coins. Returns coins dropped.
    pub fn collect_contact(&mut self, user: &str) -> Result<usize, LedgerError> {
        if !self.contacts.contains_key(user) {
            return Err(LedgerError::ContactNotRegistered(user.to_string()));
        }
        Ok(self.demote(user))
    }

    /// Look up one contact.
    pub fn contact(&self, user: &str) -> Option<&Contact> {
        self.contacts.get(user)
    }

    /// All known contacts, in no particular order.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    fn demote(&mut self, user: &str) -> usize {
        let purged = self.inventory.purge_contact(user);
        if let Some(contact) = self.contacts.get_mut(user) {
            contact.rate = 0;
            contact.priority = Priority::Stranger;
            contact.held = TierCounts::default();
        }
        purged
    }
}

impl<R, E> std::fmt::Debug for ContactLedger<R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactLedger").field("contacts", &self.contacts.len()).finish_non_exhaustive()
    }
}
