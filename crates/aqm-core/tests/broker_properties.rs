//! Property-based tests for the broker store.

use std::sync::Arc;

use aqm_core::{Broker, BrokerConfig, ManualEnv};
use aqm_proto::{Coin, KeyId, Packet, Tier};
use proptest::prelude::*;

fn broker() -> Broker<ManualEnv> {
    Broker::new(BrokerConfig::default(), ManualEnv::starting_at(1_700_000_000))
}

fn coin(kid: u64, tier: Tier) -> Coin {
    Coin {
        owner: "alice".to_string(),
        key_id: KeyId(kid),
        tier,
        public_key_hex: "0a1b".to_string(),
        signature_hex: "ff".to_string(),
    }
}

fn packet(to: &str, kid: u64) -> Packet {
    Packet {
        recipient: to.to_string(),
        key_id: KeyId(kid),
        tier: Tier::Silver,
        ciphertext_hex: String::new(),
        payload: format!("message {kid}"),
        nonce_hex: "01".repeat(24),
    }
}

fn tier_strategy() -> impl Strategy<Value = Tier> {
    prop::sample::select(Tier::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: publishing k well-formed records with fresh ids adds exactly k
    #[test]
    fn prop_publish_adds_exactly_k(tiers in prop::collection::vec(tier_strategy(), 0..30)) {
        let broker = broker();
        let batch: Vec<Coin> =
            tiers.iter().enumerate().map(|(i, t)| coin(i as u64, *t)).collect();

        let ack = broker.publish(batch).unwrap();

        prop_assert_eq!(ack.accepted as usize, tiers.len());
        prop_assert_eq!(broker.inventory_count("alice").total() as usize, tiers.len());
    }

    /// Property: one malformed record leaves the inventory unchanged
    #[test]
    fn prop_malformed_record_rejects_batch(
        tiers in prop::collection::vec(tier_strategy(), 1..30),
        bad_index in any::<prop::sample::Index>(),
    ) {
        let broker = broker();
        broker.publish(vec![coin(1_000, Tier::Gold)]).unwrap();

        let mut batch: Vec<Coin> =
            tiers.iter().enumerate().map(|(i, t)| coin(i as u64, *t)).collect();
        let bad = bad_index.index(batch.len());
        batch[bad].public_key_hex = "not hex".to_string();

        prop_assert!(broker.publish(batch).is_err());
        prop_assert_eq!(broker.inventory_count("alice").total(), 1);
    }

    /// Property: fetch returns the requested tier or nothing
    #[test]
    fn prop_fetch_matches_tier(
        tiers in prop::collection::vec(tier_strategy(), 0..20),
        wanted in tier_strategy(),
    ) {
        let broker = broker();
        let batch: Vec<Coin> =
            tiers.iter().enumerate().map(|(i, t)| coin(i as u64, *t)).collect();
        broker.publish(batch).unwrap();

        match broker.fetch("alice", wanted) {
            Some(c) => prop_assert_eq!(c.tier, wanted),
            None => prop_assert!(!tiers.contains(&wanted)),
        }
    }
}

#[test]
fn send_then_drain_once() {
    let broker = broker();
    broker.route(packet("bob", 7)).unwrap();

    assert_eq!(broker.drain("bob"), vec![packet("bob", 7)]);
    assert!(broker.drain("bob").is_empty());
}

#[test]
fn concurrent_drains_never_duplicate() {
    let broker = Arc::new(broker());
    for kid in 0..500 {
        broker.route(packet("bob", kid)).unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || broker.drain("bob"))
        })
        .collect();

    let mut seen: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .map(|p| p.key_id.get())
        .collect();
    seen.sort_unstable();

    assert_eq!(seen, (0..500).collect::<Vec<_>>());
}
