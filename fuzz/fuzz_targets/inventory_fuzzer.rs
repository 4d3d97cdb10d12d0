//! Fuzz target for the client Inventory
//!
//! # Invariants
//!
//! - Cache footprint never exceeds the ceiling
//! - A vault secret opens at most once, and opens to the bytes stored
//! - Discarding a coin removes it from every lookup

#![no_main]

use std::collections::HashMap;

use aqm_core::{Inventory, InventoryConfig};
use aqm_crypto::VaultSealer;
use aqm_proto::{Coin, KeyId, Tier};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    StorePublic { owner: bool, key: u8, tier: u8, pk_len: u8 },
    Best { owner: bool, tier: u8 },
    Discard { owner: bool, key: u8 },
    StoreSecret { key: u8, secret: Vec<u8> },
    Burn { key: u8 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    ceiling: u16,
    ops: Vec<Op>,
}

fn owner(b: bool) -> &'static str {
    if b { "alice" } else { "bob" }
}

fn tier(i: u8) -> Tier {
    Tier::ALL[i as usize % Tier::ALL.len()]
}

fuzz_target!(|input: Input| {
    let ceiling = usize::from(input.ceiling);
    let inventory =
        Inventory::with_sealer(InventoryConfig { cache_ceiling: ceiling }, VaultSealer::with_key([7; 32]));
    let mut secrets: HashMap<KeyId, Vec<u8>> = HashMap::new();

    for op in input.ops {
        match op {
            Op::StorePublic { owner: o, key, tier: t, pk_len } => {
                inventory.store_public_key(Coin {
                    owner: owner(o).to_string(),
                    key_id: KeyId(u64::from(key)),
                    tier: tier(t),
                    public_key_hex: "ab".repeat(usize::from(pk_len) + 1),
                    signature_hex: "00".to_string(),
                });
            },
            Op::Best { owner: o, tier: t } => {
                if let Some(c) = inventory.get_best_key(owner(o), tier(t)) {
                    assert_eq!(c.owner, owner(o));
                    assert_eq!(c.tier, tier(t));
                }
            },
            Op::Discard { owner: o, key } => {
                inventory.discard_public_key(owner(o), KeyId(u64::from(key)));
                for t in Tier::ALL {
                    if let Some(c) = inventory.get_best_key(owner(o), t) {
                        assert_ne!(c.key_id, KeyId(u64::from(key)), "discarded coin still served");
                    }
                }
            },
            Op::StoreSecret { key, secret } => {
                inventory.store_private_key(KeyId(u64::from(key)), &secret).expect("seal");
                secrets.insert(KeyId(u64::from(key)), secret);
            },
            Op::Burn { key } => {
                let kid = KeyId(u64::from(key));
                let opened = inventory.retrieve_and_burn(kid);
                match secrets.remove(&kid) {
                    Some(expected) => assert_eq!(opened.as_deref().map(Vec::as_slice), Some(&expected[..])),
                    None => assert!(opened.is_none(), "secret opened twice"),
                }
            },
        }

        assert!(inventory.stats().cache_bytes <= ceiling, "cache above ceiling");
    }
});
