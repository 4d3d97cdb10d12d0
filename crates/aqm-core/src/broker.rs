//! Broker store: per-user coin inventories and mailboxes.
//!
//! All state sits behind one lock covering inventories and mailboxes as a
//! unit. Each `Broker` owns its own store; clones share it.
//!
//! # Dispense policy
//!
//! With [`DispensePolicy::Shared`] (the default) a fetched coin stays in the
//! inventory and the same coin is handed to every fetcher until it goes
//! stale. [`DispensePolicy::SingleUse`] removes a coin when it is dispensed.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use aqm_proto::{
    Coin, ErrorPayload, Frame, KeyId, Packet, Payload, ProtocolError, PublishAck, Tier, TierCounts,
};
use async_trait::async_trait;
use thiserror::Error;

use crate::{BrokerRpc, Environment, RpcError};

/// Default age after which a never-dispensed coin is purged (30 days).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// What happens to a coin when it is fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispensePolicy {
    /// Coin stays in the inventory.
    #[default]
    Shared,
    /// Coin is removed from the inventory.
    SingleUse,
}

/// Broker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Fetch behavior.
    pub dispense: DispensePolicy,
    /// Age after which never-dispensed coins are purged.
    pub stale_after: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { dispense: DispensePolicy::default(), stale_after: DEFAULT_STALE_AFTER }
    }
}

/// Broker errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// A record in a publish batch failed validation. Nothing was applied.
    #[error("coin {index} in batch rejected: {source}")]
    InvalidCoin {
        /// Position in the batch
        index: usize,
        /// Validation failure
        #[source]
        source: ProtocolError,
    },

    /// A packet failed validation.
    #[error("packet rejected: {0}")]
    InvalidPacket(#[source] ProtocolError),
}

/// Broker store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Users with a non-empty inventory.
    pub users: usize,
    /// Coins across all inventories.
    pub coins: usize,
    /// Packets waiting across all mailboxes.
    pub pending_packets: usize,
}

struct Listing {
    coin: Coin,
    published_at: u64,
    dispensed: bool,
}

struct Queued {
    packet: Packet,
    encoded_len: usize,
}

#[derive(Default)]
struct BrokerState {
    inventories: HashMap<String, Vec<Listing>>,
    mailboxes: HashMap<String, Vec<Queued>>,
}

/// In-memory broker.
///
/// Thread-safe via `Arc<Mutex<_>>`. Clone shares the same underlying store.
#[derive(Clone)]
pub struct Broker<E> {
    state: Arc<Mutex<BrokerState>>,
    config: BrokerConfig,
    env: E,
}

impl<E: Environment> Broker<E> {
    /// Create a broker with an empty store.
    pub fn new(config: BrokerConfig, env: E) -> Self {
        Self { state: Arc::new(Mutex::new(BrokerState::default())), config, env }
    }

    /// Active configuration.
    pub fn config(&self) -> BrokerConfig {
        self.config
    }

    /// Append a batch of coins to their owners' inventories.
    ///
    /// Every record is validated before anything is applied; one invalid
    /// record rejects the batch. Records whose (owner, key id) is already
    /// listed are skipped and counted as duplicates.
    pub fn publish(&self, coins: Vec<Coin>) -> Result<PublishAck, BrokerError> {
        for (index, coin) in coins.iter().enumerate() {
            coin.validate().map_err(|source| BrokerError::InvalidCoin { index, source })?;
        }

        let now = self.env.wall_clock_secs();
        let mut state = self.state.lock().expect("Broker mutex poisoned");

        let mut ack = PublishAck::default();
        let mut seen: HashSet<(String, KeyId)> = HashSet::new();
        for coin in coins {
            let inventory = state.inventories.entry(coin.owner.clone()).or_default();
            let listed = inventory.iter().any(|l| l.coin.key_id == coin.key_id);
            if listed || !seen.insert((coin.owner.clone(), coin.key_id)) {
                ack.duplicates += 1;
                continue;
            }
            inventory.push(Listing { coin, published_at: now, dispensed: false });
            ack.accepted += 1;
        }

        tracing::debug!(accepted = ack.accepted, duplicates = ack.duplicates, "publish applied");
        Ok(ack)
    }

    /// First listed coin of `tier` owned by `user`.
    pub fn fetch(&self, user: &str, tier: Tier) -> Option<Coin> {
        let mut state = self.state.lock().expect("Broker mutex poisoned");

        let inventory = state.inventories.get_mut(user)?;
        let position = inventory.iter().position(|l| l.coin.tier == tier)?;

        let coin = match self.config.dispense {
            DispensePolicy::Shared => {
                let listing = &mut inventory[position];
                listing.dispensed = true;
                listing.coin.clone()
            },
            DispensePolicy::SingleUse => inventory.remove(position).coin,
        };
        if inventory.is_empty() {
            state.inventories.remove(user);
        }

        tracing::trace!(user, %tier, key_id = %coin.key_id, "dispensed coin");
        Some(coin)
    }

    /// Append a packet to its recipient's mailbox.
    ///
    /// Packets larger than [`Packet::MAILBOX_BUDGET`] encoded are rejected.
    pub fn route(&self, packet: Packet) -> Result<(), BrokerError> {
        packet.validate().map_err(BrokerError::InvalidPacket)?;
        let encoded_len = packet.encoded_len().map_err(BrokerError::InvalidPacket)?;

        let mut state = self.state.lock().expect("Broker mutex poisoned");
        tracing::trace!(to = %packet.recipient, key_id = %packet.key_id, "routed packet");
        state
            .mailboxes
            .entry(packet.recipient.clone())
            .or_default()
            .push(Queued { packet, encoded_len });
        Ok(())
    }

    /// Take the oldest pending packets for `user` that fit in one reply.
    ///
    /// Packets are taken in arrival order until their encoded size would
    /// exceed [`Packet::MAILBOX_BUDGET`]; the rest stay queued for the next
    /// drain. Take and clear happen under one lock, so concurrent drains
    /// never both see the same packet.
    pub fn drain(&self, user: &str) -> Vec<Packet> {
        let mut state = self.state.lock().expect("Broker mutex poisoned");
        let Some(mailbox) = state.mailboxes.get_mut(user) else {
            return Vec::new();
        };

        let mut used = 0;
        let take = mailbox
            .iter()
            .take_while(|q| {
                used += q.encoded_len;
                used <= Packet::MAILBOX_BUDGET
            })
            .count();
        let packets: Vec<Packet> = mailbox.drain(..take).map(|q| q.packet).collect();

        if mailbox.is_empty() {
            state.mailboxes.remove(user);
        } else {
            tracing::debug!(
                user,
                remaining = mailbox.len(),
                "mailbox reply full; rest stays queued"
            );
        }
        packets
    }

    /// Coins of `user` that no one has fetched yet, per tier.
    ///
    /// Listings kept after a shared fetch are not counted, so the figure is
    /// what the owner still has in reserve.
    pub fn inventory_count(&self, user: &str) -> TierCounts {
        let state = self.state.lock().expect("Broker mutex poisoned");

        let mut counts = TierCounts::default();
        let unfetched = state.inventories.get(user).into_iter().flatten().filter(|l| !l.dispensed);
        for listing in unfetched {
            counts.add(listing.coin.tier, 1);
        }
        counts
    }

    /// Drop never-dispensed coins older than `stale_after`.
    ///
    /// Returns the number of coins dropped.
    pub fn purge_stale(&self, now_secs: u64) -> usize {
        let max_age = self.config.stale_after.as_secs();
        let mut state = self.state.lock().expect("Broker mutex poisoned");

        let mut purged = 0;
        state.inventories.retain(|_, inventory| {
            let before = inventory.len();
            inventory
                .retain(|l| l.dispensed || now_secs.saturating_sub(l.published_at) <= max_age);
            purged += before - inventory.len();
            !inventory.is_empty()
        });

        if purged > 0 {
            tracing::info!(purged, "purged stale coins");
        }
        purged
    }

    /// Store counters.
    pub fn stats(&self) -> BrokerStats {
        let state = self.state.lock().expect("Broker mutex poisoned");
        BrokerStats {
            users: state.inventories.len(),
            coins: state.inventories.values().map(Vec::len).sum(),
            pending_packets: state.mailboxes.values().map(Vec::len).sum(),
        }
    }

    /// Answer one request payload.
    pub fn handle(&self, request: Payload) -> Payload {
        match request {
            Payload::Publish(coins) => match self.publish(coins) {
                Ok(ack) => Payload::PublishAck(ack),
                Err(e) => Payload::Error(ErrorPayload::invalid_payload(e.to_string())),
            },
            Payload::Fetch(req) => match self.fetch(&req.user, req.tier) {
                Some(coin) => Payload::CoinGranted(coin),
                None => Payload::NotFound,
            },
            Payload::Send(packet) => match self.route(packet) {
                Ok(()) => Payload::SendAck,
                Err(e) => Payload::Error(ErrorPayload::invalid_payload(e.to_string())),
            },
            Payload::Drain(req) => Payload::Mailbox(self.drain(&req.user)),
            Payload::Count(req) => Payload::Counts(self.inventory_count(&req.user)),
            response => Payload::Error(ErrorPayload::unexpected_opcode(response.opcode())),
        }
    }

    /// Decode a request frame and answer it.
    ///
    /// Undecodable payloads become `INVALID_PAYLOAD` errors; no state changes.
    pub fn handle_frame(&self, frame: &Frame) -> Payload {
        match Payload::from_frame(frame) {
            Ok(request) => self.handle(request),
            Err(e) => {
                tracing::debug!(opcode = frame.header.opcode(), error = %e, "malformed request");
                Payload::Error(ErrorPayload::invalid_payload(e.to_string()))
            },
        }
    }
}

impl<E> std::fmt::Debug for Broker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker").field("config", &self.config).finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Environment> BrokerRpc for Broker<E> {
    async fn publish(&self, coins: Vec<Coin>) -> Result<PublishAck, RpcError> {
        Broker::publish(self, coins).map_err(|e| RpcError::Rejected {
            code: ErrorPayload::INVALID_PAYLOAD,
            message: e.to_string(),
        })
    }

    async fn fetch(&self, user: &str, tier: Tier) -> Result<Option<Coin>, RpcError> {
        Ok(Broker::fetch(self, user, tier))
    }

    async fn send(&self, packet: Packet) -> Result<(), RpcError> {
        self.route(packet).map_err(|e| RpcError::Rejected {
            code: ErrorPayload::INVALID_PAYLOAD,
            message: e.to_string(),
        })
    }

    async fn drain(&self, user: &str) -> Result<Vec<Packet>, RpcError> {
        Ok(Broker::drain(self, user))
    }

    async fn count(&self, user: &str) -> Result<TierCounts, RpcError> {
        Ok(self.inventory_count(user))
    }
}

#[cfg(test)]
mod tests {
    use aqm_proto::{DrainRequest, FetchRequest, FrameHeader, Opcode};

    use super::*;
    use crate::ManualEnv;

    fn broker(dispense: DispensePolicy) -> (Broker<ManualEnv>, ManualEnv) {
        let env = ManualEnv::starting_at(1_700_000_000);
        let config = BrokerConfig { dispense, ..BrokerConfig::default() };
        (Broker::new(config, env.clone()), env)
    }

    fn coin(owner: &str, kid: u64, tier: Tier) -> Coin {
        Coin {
            owner: owner.to_string(),
            key_id: KeyId(kid),
            tier,
            public_key_hex: "abcd".to_string(),
            signature_hex: "ef".to_string(),
        }
    }

    fn packet(to: &str, kid: u64) -> Packet {
        Packet {
            recipient: to.to_string(),
            key_id: KeyId(kid),
            tier: Tier::Gold,
            ciphertext_hex: String::new(),
            payload: "hi".to_string(),
            nonce_hex: "00".repeat(24),
        }
    }

    #[test]
    fn shared_fetch_keeps_coin() {
        let (broker, _) = broker(DispensePolicy::Shared);
        broker.publish(vec![coin("alice", 1, Tier::Gold), coin("alice", 2, Tier::Gold)]).unwrap();

        assert_eq!(broker.fetch("alice", Tier::Gold).unwrap().key_id, KeyId(1));
        assert_eq!(broker.fetch("alice", Tier::Gold).unwrap().key_id, KeyId(1));
        assert_eq!(broker.stats().coins, 2);
    }

    #[test]
    fn count_skips_fetched_coins() {
        let (broker, _) = broker(DispensePolicy::Shared);
        broker.publish(vec![coin("alice", 1, Tier::Gold), coin("alice", 2, Tier::Gold)]).unwrap();

        broker.fetch("alice", Tier::Gold);

        assert_eq!(broker.inventory_count("alice"), TierCounts::new(1, 0, 0));
    }

    #[test]
    fn oversized_mailbox_drains_across_replies() {
        let (broker, _) = broker(DispensePolicy::Shared);
        let big = |kid| Packet { payload: "x".repeat(3 * 1024 * 1024), ..packet("bob", kid) };
        broker.route(big(1)).unwrap();
        broker.route(big(2)).unwrap();

        let first = broker.drain("bob");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key_id, KeyId(1));
        assert_eq!(broker.stats().pending_packets, 1);

        let second = broker.drain("bob");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].key_id, KeyId(2));
        assert!(broker.drain("bob").is_empty());
    }

    #[test]
    fn single_use_fetch_removes_coin() {
        let (broker, _) = broker(DispensePolicy::SingleUse);
        broker.publish(vec![coin("alice", 1, Tier::Gold), coin("alice", 2, Tier::Gold)]).unwrap();

        assert_eq!(broker.fetch("alice", Tier::Gold).unwrap().key_id, KeyId(1));
        assert_eq!(broker.fetch("alice", Tier::Gold).unwrap().key_id, KeyId(2));
        assert_eq!(broker.fetch("alice", Tier::Gold), None);
        assert_eq!(broker.stats().users, 0);
    }

    #[test]
    fn fetch_misses() {
        let (broker, _) = broker(DispensePolicy::Shared);
        broker.publish(vec![coin("alice", 1, Tier::Gold)]).unwrap();

        assert_eq!(broker.fetch("alice", Tier::Bronze), None);
        assert_eq!(broker.fetch("bob", Tier::Gold), None);
    }

    #[test]
    fn duplicates_are_skipped() {
        let (broker, _) = broker(DispensePolicy::Shared);
        broker.publish(vec![coin("alice", 1, Tier::Gold)]).unwrap();

        let ack = broker
            .publish(vec![
                coin("alice", 1, Tier::Gold),
                coin("alice", 2, Tier::Silver),
                coin("alice", 2, Tier::Silver),
            ])
            .unwrap();
        assert_eq!(ack, PublishAck { accepted: 1, duplicates: 2 });

        // Same id under another owner is a different coin.
        let ack = broker.publish(vec![coin("bob", 1, Tier::Gold)]).unwrap();
        assert_eq!(ack.accepted, 1);
    }

    #[test]
    fn stale_purge_spares_dispensed() {
        let (broker, env) = broker(DispensePolicy::Shared);
        broker.publish(vec![coin("alice", 1, Tier::Gold), coin("alice", 2, Tier::Silver)]).unwrap();
        broker.fetch("alice", Tier::Gold);

        env.advance(DEFAULT_STALE_AFTER);
        assert_eq!(broker.purge_stale(env.wall_clock_secs()), 0);

        env.advance(Duration::from_secs(1));
        assert_eq!(broker.purge_stale(env.wall_clock_secs()), 1);
        assert_eq!(broker.stats().coins, 1);
        assert_eq!(broker.fetch("alice", Tier::Gold).unwrap().key_id, KeyId(1));
    }

    #[test]
    fn route_rejects_missing_recipient() {
        let (broker, _) = broker(DispensePolicy::Shared);

        assert!(matches!(broker.route(packet("", 1)), Err(BrokerError::InvalidPacket(_))));
        assert_eq!(broker.stats().pending_packets, 0);
    }

    #[test]
    fn handle_dispatches() {
        let (broker, _) = broker(DispensePolicy::Shared);

        let reply = broker.handle(Payload::Publish(vec![coin("alice", 1, Tier::Gold)]));
        assert_eq!(reply, Payload::PublishAck(PublishAck { accepted: 1, duplicates: 0 }));

        let reply =
            broker.handle(Payload::Fetch(FetchRequest { user: "alice".into(), tier: Tier::Gold }));
        assert_eq!(reply, Payload::CoinGranted(coin("alice", 1, Tier::Gold)));

        let reply =
            broker.handle(Payload::Fetch(FetchRequest { user: "alice".into(), tier: Tier::Silver }));
        assert_eq!(reply, Payload::NotFound);

        assert_eq!(broker.handle(Payload::Send(packet("bob", 9))), Payload::SendAck);
        assert_eq!(
            broker.handle(Payload::Drain(DrainRequest { user: "bob".into() })),
            Payload::Mailbox(vec![packet("bob", 9)])
        );
    }

    #[test]
    fn handle_rejects_responses_and_bad_records() {
        let (broker, _) = broker(DispensePolicy::Shared);

        assert_eq!(
            broker.handle(Payload::SendAck),
            Payload::Error(ErrorPayload::unexpected_opcode(Opcode::SendAck))
        );

        let mut bad = coin("alice", 2, Tier::Gold);
        bad.public_key_hex = "XYZ".to_string();
        let reply = broker.handle(Payload::Publish(vec![coin("alice", 1, Tier::Gold), bad]));
        assert!(matches!(
            reply,
            Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })
        ));
        assert_eq!(broker.inventory_count("alice").total(), 0);
    }

    #[test]
    fn handle_frame_maps_decode_errors() {
        let (broker, _) = broker(DispensePolicy::Shared);
        let frame = Frame::new(FrameHeader::new(Opcode::Fetch), vec![0xFF, 0x00]);

        assert!(matches!(
            broker.handle_frame(&frame),
            Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })
        ));
    }
}
