//! Client operations: minting our own coins, sending to a contact, and
//! draining our mailbox.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use aqm_core::{BrokerRpc, Environment, Inventory, IssuancePolicy, IssueContext, RpcError};
use aqm_crypto::{CryptoError, KeyMintEngine};
use aqm_proto::{Coin, KeyId, Packet, Tier, TierCounts};
use thiserror::Error;

/// Nonce length attached to every outgoing packet.
pub const NONCE_BYTES: usize = 24;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Broker call failed.
    #[error(transparent)]
    Transport(#[from] RpcError),

    /// No cached coin for the recipient in the requested tier or below.
    #[error("no coin cached for {recipient} at {tier} or below")]
    KeyExhausted {
        /// Intended recipient
        recipient: String,
        /// Tier that was asked for
        tier: Tier,
    },

    /// Vault sealing failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Outcome of one mint batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MintReport {
    /// Time seed the key ids were derived from.
    pub seed: u64,
    /// Coins sent to the broker, per tier.
    pub minted: TierCounts,
    /// Keypairs that failed to generate and were skipped.
    pub skipped: u32,
    /// Records the broker appended.
    pub accepted: u32,
    /// Records the broker already had.
    pub duplicates: u32,
}

/// Outcome of one mailbox drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailReport {
    /// Packets whose one-time secret was found and burned.
    pub delivered: Vec<Packet>,
    /// Packets addressed to a key id we hold no secret for.
    pub missing_key: Vec<Packet>,
}

/// One user's view of the relay.
pub struct Client<R, E> {
    user: String,
    engine: Arc<KeyMintEngine>,
    inventory: Inventory,
    rpc: Arc<R>,
    env: E,
    policy: IssuancePolicy,
    last_seed: AtomicU64,
}

impl<R: BrokerRpc, E: Environment> Client<R, E> {
    /// Create a client for `user` with the default issuance table.
    pub fn new(
        user: impl Into<String>,
        engine: Arc<KeyMintEngine>,
        inventory: Inventory,
        rpc: Arc<R>,
        env: E,
    ) -> Self {
        Self {
            user: user.into(),
            engine,
            inventory,
            rpc,
            env,
            policy: IssuancePolicy::default(),
            last_seed: AtomicU64::new(0),
        }
    }

    /// Replace the issuance table.
    #[must_use]
    pub fn with_policy(mut self, policy: IssuancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Our identity.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Shared inventory handle.
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Broker handle.
    pub fn rpc(&self) -> &Arc<R> {
        &self.rpc
    }

    /// Environment the client runs on.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Mint one batch of coins and publish their public halves.
    ///
    /// Secrets go into the vault before the publish. If the broker rejects
    /// the batch its secrets are discarded again. On a transport or protocol
    /// failure the broker may still have applied it, so the secrets stay.
    pub async fn mint_batch(&self) -> Result<MintReport, ClientError> {
        let seed = self.next_seed();
        let mut report = MintReport { seed, ..MintReport::default() };
        let mut coins = Vec::new();

        for tier in Tier::ALL {
            let quantity = self.policy.quantity(IssueContext::Mint, tier);
            for index in 0..quantity {
                let Ok(index) = u16::try_from(index) else { break };
                let key_id = KeyId::derive(seed, tier, index);
                let pair = match self.engine.generate_keypair(tier) {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(%tier, %key_id, error = %e, "keygen failed; skipping slot");
                        report.skipped += 1;
                        continue;
                    },
                };

                if let Err(e) = self.inventory.store_private_key(key_id, pair.secret()) {
                    self.rollback(&coins);
                    return Err(e.into());
                }

                let signature_hex = self.engine.sign_key(&pair.public_hex, tier);
                coins.push(Coin {
                    owner: self.user.clone(),
                    key_id,
                    tier,
                    public_key_hex: pair.public_hex.clone(),
                    signature_hex,
                });
                report.minted.add(tier, 1);
            }
        }

        if coins.is_empty() {
            tracing::warn!(user = %self.user, seed, "mint batch produced no coins");
            return Ok(report);
        }

        match self.rpc.publish(coins.clone()).await {
            Ok(ack) => {
                report.accepted = ack.accepted;
                report.duplicates = ack.duplicates;
                tracing::info!(
                    user = %self.user,
                    seed,
                    accepted = ack.accepted,
                    duplicates = ack.duplicates,
                    skipped = report.skipped,
                    "published mint batch"
                );
                Ok(report)
            },
            Err(e @ RpcError::Rejected { .. }) => {
                tracing::warn!(
                    user = %self.user,
                    seed,
                    error = %e,
                    "publish rejected; discarding batch"
                );
                self.rollback(&coins);
                Err(e.into())
            },
            Err(e) => {
                // The broker may have applied the batch; its coins need their secrets.
                tracing::warn!(
                    user = %self.user,
                    seed,
                    error = %e,
                    "publish outcome unknown; keeping batch"
                );
                Err(e.into())
            },
        }
    }

    /// Send `text` to `recipient` using one of their cached coins.
    ///
    /// Tries `tier_hint` first, then lower tiers. The coin is discarded after
    /// a successful send; on failure it stays cached for the next attempt.
    pub async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        tier_hint: Tier,
    ) -> Result<KeyId, ClientError> {
        let Some(coin) = self.inventory.get_key_with_fallback(recipient, tier_hint) else {
            return Err(ClientError::KeyExhausted {
                recipient: recipient.to_string(),
                tier: tier_hint,
            });
        };

        let mut nonce = [0u8; NONCE_BYTES];
        self.env.random_bytes(&mut nonce);

        let packet = Packet {
            recipient: recipient.to_string(),
            key_id: coin.key_id,
            tier: coin.tier,
            ciphertext_hex: String::new(),
            payload: text.to_string(),
            nonce_hex: hex::encode(nonce),
        };

        self.rpc.send(packet).await?;
        self.inventory.discard_public_key(recipient, coin.key_id);

        tracing::info!(recipient, key_id = %coin.key_id, tier = %coin.tier, "message sent");
        Ok(coin.key_id)
    }

    /// Drain our mailbox and burn the secret behind every packet.
    pub async fn check_mail(&self) -> Result<MailReport, ClientError> {
        let packets = self.rpc.drain(&self.user).await?;
        let mut report = MailReport::default();

        for packet in packets {
            if self.inventory.retrieve_and_burn(packet.key_id).is_some() {
                tracing::info!(
                    user = %self.user,
                    key_id = %packet.key_id,
                    tier = %packet.tier,
                    "message received"
                );
                report.delivered.push(packet);
            } else {
                tracing::error!(
                    user = %self.user,
                    key_id = %packet.key_id,
                    "packet references a key we do not hold"
                );
                report.missing_key.push(packet);
            }
        }

        Ok(report)
    }

    /// Seed strictly greater than every seed used before.
    fn next_seed(&self) -> u64 {
        let now = self.env.wall_clock_secs();
        let pick = |last: u64| now.max(last + 1);
        match self.last_seed.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(pick(last))) {
            Ok(prev) | Err(prev) => pick(prev),
        }
    }

    fn rollback(&self, coins: &[Coin]) {
        for coin in coins {
            self.inventory.discard_private_key(coin.key_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use aqm_core::{Broker, BrokerConfig, InventoryConfig, ManualEnv};

    use super::*;

    fn setup(user: &str) -> (Client<Broker<ManualEnv>, ManualEnv>, Broker<ManualEnv>) {
        let env = ManualEnv::starting_at(1_700_000_000);
        let broker = Broker::new(BrokerConfig::default(), env.clone());
        let inventory = Inventory::new(InventoryConfig::default()).unwrap();
        let engine = Arc::new(KeyMintEngine::new().unwrap());
        let client = Client::new(user, engine, inventory, Arc::new(broker.clone()), env);
        (client, broker)
    }

    #[tokio::test]
    async fn seeds_strictly_increase_within_one_second() {
        let (client, _) = setup("alice");

        let a = client.next_seed();
        let b = client.next_seed();
        let c = client.next_seed();

        assert_eq!(a, 1_700_000_000);
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn send_without_coin_is_key_exhausted() {
        let (client, _) = setup("alice");

        let err = client.send_message("bob", "hi", Tier::Gold).await.unwrap_err();
        assert!(matches!(err, ClientError::KeyExhausted { tier: Tier::Gold, .. }));
    }

    #[tokio::test]
    async fn send_consumes_cached_coin() {
        let (client, broker) = setup("alice");
        let coin = Coin {
            owner: "bob".to_string(),
            key_id: KeyId(42),
            tier: Tier::Silver,
            public_key_hex: "abcd".to_string(),
            signature_hex: "ef".to_string(),
        };
        client.inventory().store_public_key(coin);

        let used = client.send_message("bob", "hello", Tier::Gold).await.unwrap();
        assert_eq!(used, KeyId(42));
        assert_eq!(client.inventory().tier_counts("bob").total(), 0);

        let mail = broker.drain("bob");
        assert_eq!(mail.len(), 1);
        assert_eq!(mail[0].payload, "hello");
        assert_eq!(mail[0].tier, Tier::Silver);
        assert_eq!(mail[0].nonce_hex.len(), NONCE_BYTES * 2);
        assert!(mail[0].ciphertext_hex.is_empty());
    }

    #[tokio::test]
    async fn check_mail_reports_unknown_key() {
        let (client, broker) = setup("alice");
        broker
            .route(Packet {
                recipient: "alice".to_string(),
                key_id: KeyId(9),
                tier: Tier::Bronze,
                ciphertext_hex: String::new(),
                payload: "ghost".to_string(),
                nonce_hex: "00".to_string(),
            })
            .unwrap();

        let report = client.check_mail().await.unwrap();
        assert!(report.delivered.is_empty());
        assert_eq!(report.missing_key.len(), 1);
    }
}
