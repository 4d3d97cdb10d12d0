//! Fuzz target for Broker state transitions
//!
//! # Strategy
//!
//! Random sequences of publish / fetch / send / drain / purge against a
//! single-use broker, mirrored by a simple model.
//!
//! # Invariants
//!
//! - An accepted publish adds exactly the non-duplicate records
//! - A batch containing any invalid record changes nothing
//! - Fetch returns only coins of the requested owner and tier, each once
//! - Every routed packet is drained exactly once

#![no_main]

use std::collections::{HashMap, HashSet};

use aqm_core::{Broker, BrokerConfig, DispensePolicy, ManualEnv};
use aqm_proto::{Coin, KeyId, Packet, Tier};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

const USERS: [&str; 3] = ["alice", "bob", "carol"];

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Publish { user: u8, records: Vec<(u8, u8, bool)> },
    Fetch { user: u8, tier: u8 },
    Send { user: u8, key: u8 },
    Drain { user: u8 },
    Purge { advance_days: u8 },
}

fn user(i: u8) -> &'static str {
    USERS[i as usize % USERS.len()]
}

fn tier(i: u8) -> Tier {
    Tier::ALL[i as usize % Tier::ALL.len()]
}

fn coin(owner: &str, key: u8, tier_byte: u8, valid: bool) -> Coin {
    Coin {
        owner: owner.to_string(),
        key_id: KeyId(u64::from(key)),
        tier: tier(tier_byte),
        public_key_hex: if valid { "abcd".to_string() } else { "XYZ".to_string() },
        signature_hex: "00".to_string(),
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let env = ManualEnv::starting_at(1_700_000_000);
    let config = BrokerConfig { dispense: DispensePolicy::SingleUse, ..BrokerConfig::default() };
    let broker = Broker::new(config, env.clone());

    let mut published: HashSet<(String, KeyId)> = HashSet::new();
    let mut dispensed: HashSet<(String, KeyId)> = HashSet::new();
    let mut pending: HashMap<String, usize> = HashMap::new();

    for op in ops {
        match op {
            Op::Publish { user: u, records } => {
                let owner = user(u);
                let coins: Vec<Coin> =
                    records.iter().map(|&(k, t, valid)| coin(owner, k, t, valid)).collect();
                let before = broker.stats().coins;
                let any_invalid = records.iter().any(|&(_, _, valid)| !valid);

                match broker.publish(coins.clone()) {
                    Ok(ack) => {
                        assert!(!any_invalid, "invalid batch accepted");
                        assert_eq!(broker.stats().coins, before + ack.accepted as usize);
                        for c in coins {
                            let key = (c.owner, c.key_id);
                            dispensed.remove(&key);
                            published.insert(key);
                        }
                    },
                    Err(_) => {
                        assert!(any_invalid, "valid batch rejected");
                        assert_eq!(broker.stats().coins, before, "rejected batch mutated state");
                    },
                }
            },
            Op::Fetch { user: u, tier: t } => {
                let owner = user(u);
                if let Some(c) = broker.fetch(owner, tier(t)) {
                    assert_eq!(c.owner, owner);
                    assert_eq!(c.tier, tier(t));
                    let key = (c.owner, c.key_id);
                    assert!(published.contains(&key), "fetched a coin that was never published");
                    assert!(dispensed.insert(key), "single-use coin dispensed twice");
                }
            },
            Op::Send { user: u, key } => {
                let packet = Packet {
                    recipient: user(u).to_string(),
                    key_id: KeyId(u64::from(key)),
                    tier: Tier::Bronze,
                    ciphertext_hex: String::new(),
                    payload: "x".to_string(),
                    nonce_hex: "00".to_string(),
                };
                broker.route(packet).expect("well-formed packet must route");
                *pending.entry(user(u).to_string()).or_default() += 1;
            },
            Op::Drain { user: u } => {
                let expected = pending.remove(user(u)).unwrap_or(0);
                assert_eq!(broker.drain(user(u)).len(), expected);
                assert!(broker.drain(user(u)).is_empty(), "second drain returned packets");
            },
            Op::Purge { advance_days } => {
                env.advance(std::time::Duration::from_secs(u64::from(advance_days) * 86_400));
                let before = broker.stats().coins;
                let purged = broker.purge_stale(env.wall_clock_secs());
                assert_eq!(broker.stats().coins, before - purged);
            },
        }
    }
});
