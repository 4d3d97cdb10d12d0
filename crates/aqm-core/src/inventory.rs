//! Client-side key inventory: public coin cache plus private key vault.
//!
//! Both stores back the same "my keys" resource and share one lock. The cache
//! holds public coins fetched from contacts, bounded by a byte ceiling with
//! LRU eviction. The vault holds our own secret halves, sealed at rest, and
//! hands each one out at most once.
//!
//! # Invariants
//!
//! - Cache footprint is at or below the ceiling after every mutating call.
//! - `retrieve_and_burn` removes the entry in the same critical section that
//!   finds it. A second call with the same id returns `None`.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use aqm_crypto::{CryptoError, SealedSecret, VaultSealer};
use aqm_proto::{Coin, KeyId, Tier, TierCounts};
use zeroize::Zeroizing;

/// Fixed per-record overhead added to each cache entry's footprint.
pub const RECORD_OVERHEAD: usize = 64;

/// Default cache ceiling (64 KiB).
pub const DEFAULT_CACHE_CEILING: usize = 64 * 1024;

/// Inventory configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryConfig {
    /// Maximum approximate byte footprint of the public coin cache.
    pub cache_ceiling: usize,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self { cache_ceiling: DEFAULT_CACHE_CEILING }
    }
}

/// Result of storing a public coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// New entry, no eviction needed.
    Inserted,
    /// Entry already cached; promoted to most recently used.
    Refreshed,
    /// New entry stored and `n` entries evicted to get back under the
    /// ceiling. An entry larger than the ceiling evicts itself.
    InsertedWithEviction(usize),
}

/// Inventory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InventoryStats {
    /// Coins in the cache.
    pub cached_coins: usize,
    /// Current cache footprint.
    pub cache_bytes: usize,
    /// Configured ceiling.
    pub cache_ceiling: usize,
    /// Sealed secrets in the vault.
    pub vault_entries: usize,
    /// Secrets handed out since creation.
    pub burned_total: u64,
    /// Cache entries evicted since creation.
    pub evicted_total: u64,
}

/// Cache key. Ordered by owner, then ascending key id.
type CacheKey = (String, KeyId);

struct CacheEntry {
    coin: Coin,
    footprint: usize,
    /// Recency tick; larger is more recent.
    touched: u64,
}

/// Shared key inventory.
///
/// Thread-safe via `Arc<Mutex<_>>`. Clone shares the same underlying storage.
#[derive(Clone)]
pub struct Inventory {
    inner: Arc<Mutex<InventoryInner>>,
}

struct InventoryInner {
    config: InventoryConfig,
    cache: BTreeMap<CacheKey, CacheEntry>,
    /// Recency tick to cache key, oldest first.
    lru: BTreeMap<u64, CacheKey>,
    cache_bytes: usize,
    tick: u64,
    vault: HashMap<KeyId, SealedSecret>,
    sealer: VaultSealer,
    burned_total: u64,
    evicted_total: u64,
}

impl Inventory {
    /// Create an empty inventory with a fresh vault sealing key.
    ///
    /// # Errors
    ///
    /// `CryptoError::Rng` if no sealing key could be drawn.
    pub fn new(config: InventoryConfig) -> Result<Self, CryptoError> {
        Ok(Self::with_sealer(config, VaultSealer::new()?))
    }

    /// Create an empty inventory that seals with `sealer`.
    pub fn with_sealer(config: InventoryConfig, sealer: VaultSealer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InventoryInner {
                config,
                cache: BTreeMap::new(),
                lru: BTreeMap::new(),
                cache_bytes: 0,
                tick: 0,
                vault: HashMap::new(),
                sealer,
                burned_total: 0,
                evicted_total: 0,
            })),
        }
    }

    /// Insert a coin, or promote it if already cached.
    ///
    /// Existing entries keep their stored fields.
    pub fn store_public_key(&self, coin: Coin) -> CacheOutcome {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");

        let key = (coin.owner.clone(), coin.key_id);
        if inner.cache.contains_key(&key) {
            inner.touch(&key);
            return CacheOutcome::Refreshed;
        }

        let footprint = footprint(&coin);
        let tick = inner.next_tick();
        inner.lru.insert(tick, key.clone());
        inner.cache.insert(key, CacheEntry { coin, footprint, touched: tick });
        inner.cache_bytes += footprint;

        match inner.evict() {
            0 => CacheOutcome::Inserted,
            n => CacheOutcome::InsertedWithEviction(n),
        }
    }

    /// First cached coin for (`user`, `tier`) in ascending key id order.
    ///
    /// A hit is promoted to most recently used. Returns a snapshot; the
    /// entry may be evicted afterwards without affecting the caller.
    pub fn get_best_key(&self, user: &str, tier: Tier) -> Option<Coin> {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");

        let key = inner.first_match(user, tier)?;
        inner.touch(&key);
        inner.cache.get(&key).map(|entry| entry.coin.clone())
    }

    /// Like [`Self::get_best_key`], falling back to lower tiers in order.
    pub fn get_key_with_fallback(&self, user: &str, tier: Tier) -> Option<Coin> {
        std::iter::once(&tier)
            .chain(tier.fallbacks())
            .find_map(|&t| self.get_best_key(user, t))
    }

    /// Drop a cached coin once it has been used to send.
    pub fn discard_public_key(&self, user: &str, key_id: KeyId) -> bool {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");
        inner.remove(&(user.to_string(), key_id))
    }

    /// Evict least recently used coins until under the ceiling.
    ///
    /// Returns the number evicted.
    pub fn evict(&self) -> usize {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");
        inner.evict()
    }

    /// Drop every cached coin owned by `user`. Returns the number dropped.
    pub fn purge_contact(&self, user: &str) -> usize {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");

        let keys: Vec<CacheKey> =
            inner.cache.range(owner_range(user)).map(|(key, _)| key.clone()).collect();
        for key in &keys {
            inner.remove(key);
        }
        keys.len()
    }

    /// Cached coin counts for `user`.
    pub fn tier_counts(&self, user: &str) -> TierCounts {
        let inner = self.inner.lock().expect("Inventory mutex poisoned");

        let mut counts = TierCounts::default();
        for (_, entry) in inner.cache.range(owner_range(user)) {
            counts.add(entry.coin.tier, 1);
        }
        counts
    }

    /// Seal and store one of our own secret halves.
    ///
    /// Overwrites any entry with the same id.
    ///
    /// # Errors
    ///
    /// Any `CryptoError` from sealing; nothing is stored in that case.
    pub fn store_private_key(&self, key_id: KeyId, secret: &[u8]) -> Result<(), CryptoError> {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");

        let sealed = inner.sealer.seal(key_id, secret)?;
        if inner.vault.insert(key_id, sealed).is_some() {
            tracing::warn!(%key_id, "vault entry overwritten on key id reuse");
        }
        Ok(())
    }

    /// Take a secret out of the vault. Works at most once per id.
    ///
    /// A sealed entry that fails to open is still removed and reported as
    /// `None`.
    pub fn retrieve_and_burn(&self, key_id: KeyId) -> Option<Zeroizing<Vec<u8>>> {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");

        let sealed = inner.vault.remove(&key_id)?;
        inner.burned_total += 1;

        match inner.sealer.open(key_id, &sealed) {
            Ok(secret) => Some(secret),
            Err(e) => {
                tracing::error!(%key_id, error = %e, "vault entry failed to open; burned");
                None
            },
        }
    }

    /// Drop a vault entry without opening it, e.g. when its coin never got
    /// published. Does not count as a burn.
    pub fn discard_private_key(&self, key_id: KeyId) -> bool {
        let mut inner = self.inner.lock().expect("Inventory mutex poisoned");
        inner.vault.remove(&key_id).is_some()
    }

    /// True if a secret for `key_id` is still in the vault.
    pub fn has_private_key(&self, key_id: KeyId) -> bool {
        let inner = self.inner.lock().expect("Inventory mutex poisoned");
        inner.vault.contains_key(&key_id)
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> InventoryStats {
        let inner = self.inner.lock().expect("Inventory mutex poisoned");
        InventoryStats {
            cached_coins: inner.cache.len(),
            cache_bytes: inner.cache_bytes,
            cache_ceiling: inner.config.cache_ceiling,
            vault_entries: inner.vault.len(),
            burned_total: inner.burned_total,
            evicted_total: inner.evicted_total,
        }
    }
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory").field("stats", &self.stats()).finish()
    }
}

impl InventoryInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &CacheKey) {
        let tick = self.next_tick();
        if let Some(entry) = self.cache.get_mut(key) {
            self.lru.remove(&entry.touched);
            entry.touched = tick;
            self.lru.insert(tick, key.clone());
        }
    }

    fn first_match(&self, user: &str, tier: Tier) -> Option<CacheKey> {
        self.cache
            .range(owner_range(user))
            .find(|(_, entry)| entry.coin.tier == tier)
            .map(|(key, _)| key.clone())
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.cache.remove(key) {
            Some(entry) => {
                self.lru.remove(&entry.touched);
                self.cache_bytes -= entry.footprint;
                true
            },
            None => false,
        }
    }

    fn evict(&mut self) -> usize {
        let mut evicted = 0;
        while self.cache_bytes > self.config.cache_ceiling {
            let Some((_, key)) = self.lru.pop_first() else { break };
            if let Some(entry) = self.cache.remove(&key) {
                self.cache_bytes -= entry.footprint;
                tracing::debug!(user = %key.0, key_id = %key.1, "evicted cached coin");
            }
            evicted += 1;
        }
        self.evicted_total += evicted as u64;
        evicted
    }
}

fn footprint(coin: &Coin) -> usize {
    coin.owner.len() + coin.public_key_hex.len() + coin.signature_hex.len() + RECORD_OVERHEAD
}

fn owner_range(user: &str) -> std::ops::RangeInclusive<CacheKey> {
    (user.to_string(), KeyId(0))..=(user.to_string(), KeyId(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory(ceiling: usize) -> Inventory {
        Inventory::with_sealer(InventoryConfig { cache_ceiling: ceiling }, VaultSealer::with_key([3; 32]))
    }

    fn coin(owner: &str, kid: u64, tier: Tier) -> Coin {
        Coin {
            owner: owner.to_string(),
            key_id: KeyId(kid),
            tier,
            public_key_hex: "ab".repeat(16),
            signature_hex: "cd".repeat(16),
        }
    }

    fn size(owner: &str) -> usize {
        footprint(&coin(owner, 0, Tier::Gold))
    }

    #[test]
    fn store_then_refresh() {
        let inv = inventory(DEFAULT_CACHE_CEILING);

        assert_eq!(inv.store_public_key(coin("bob", 1, Tier::Gold)), CacheOutcome::Inserted);

        let mut altered = coin("bob", 1, Tier::Gold);
        altered.public_key_hex = "ff".to_string();
        assert_eq!(inv.store_public_key(altered), CacheOutcome::Refreshed);

        let cached = inv.get_best_key("bob", Tier::Gold).unwrap();
        assert_eq!(cached.public_key_hex, "ab".repeat(16));
        assert_eq!(inv.stats().cached_coins, 1);
    }

    #[test]
    fn best_key_is_lowest_matching_id() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        inv.store_public_key(coin("bob", 9, Tier::Silver));
        inv.store_public_key(coin("bob", 4, Tier::Silver));
        inv.store_public_key(coin("bob", 2, Tier::Gold));
        inv.store_public_key(coin("carol", 1, Tier::Silver));

        assert_eq!(inv.get_best_key("bob", Tier::Silver).unwrap().key_id, KeyId(4));
        assert_eq!(inv.get_best_key("bob", Tier::Bronze), None);
        assert_eq!(inv.get_best_key("dave", Tier::Silver), None);
    }

    #[test]
    fn fallback_walks_down_tiers() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        inv.store_public_key(coin("bob", 5, Tier::Bronze));

        assert_eq!(inv.get_key_with_fallback("bob", Tier::Gold).unwrap().key_id, KeyId(5));
        assert_eq!(inv.get_key_with_fallback("bob", Tier::Bronze).unwrap().key_id, KeyId(5));

        inv.store_public_key(coin("carol", 6, Tier::Gold));
        assert_eq!(inv.get_key_with_fallback("carol", Tier::Silver), None);
    }

    #[test]
    fn eviction_removes_least_recently_used() {
        let inv = inventory(size("bob") * 3);
        inv.store_public_key(coin("bob", 1, Tier::Gold));
        inv.store_public_key(coin("bob", 2, Tier::Silver));
        inv.store_public_key(coin("bob", 3, Tier::Bronze));

        // Touch 1 so 2 becomes the oldest.
        inv.get_best_key("bob", Tier::Gold);

        let outcome = inv.store_public_key(coin("bob", 4, Tier::Bronze));
        assert_eq!(outcome, CacheOutcome::InsertedWithEviction(1));
        assert_eq!(inv.get_best_key("bob", Tier::Silver), None);
        assert!(inv.get_best_key("bob", Tier::Gold).is_some());
        assert_eq!(inv.stats().evicted_total, 1);
    }

    #[test]
    fn oversized_entry_evicts_itself() {
        let inv = inventory(8);
        let outcome = inv.store_public_key(coin("bob", 1, Tier::Gold));

        assert_eq!(outcome, CacheOutcome::InsertedWithEviction(1));
        assert_eq!(inv.stats().cache_bytes, 0);
    }

    #[test]
    fn discard_and_purge() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        inv.store_public_key(coin("bob", 1, Tier::Gold));
        inv.store_public_key(coin("bob", 2, Tier::Gold));
        inv.store_public_key(coin("carol", 3, Tier::Gold));

        assert!(inv.discard_public_key("bob", KeyId(1)));
        assert!(!inv.discard_public_key("bob", KeyId(1)));
        assert_eq!(inv.tier_counts("bob"), TierCounts::new(1, 0, 0));

        assert_eq!(inv.purge_contact("bob"), 1);
        assert_eq!(inv.tier_counts("bob").total(), 0);
        assert_eq!(inv.tier_counts("carol").total(), 1);
        assert_eq!(inv.stats().cache_bytes, size("carol"));
    }

    #[test]
    fn burn_once() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        inv.store_private_key(KeyId(42), b"secret").unwrap();

        assert!(inv.has_private_key(KeyId(42)));
        assert_eq!(inv.retrieve_and_burn(KeyId(42)).unwrap().as_slice(), b"secret");
        assert_eq!(inv.retrieve_and_burn(KeyId(42)), None);
        assert_eq!(inv.retrieve_and_burn(KeyId(43)), None);
        assert_eq!(inv.stats().burned_total, 1);
    }

    #[test]
    fn discarded_secret_is_not_a_burn() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        inv.store_private_key(KeyId(5), b"unpublished").unwrap();

        assert!(inv.discard_private_key(KeyId(5)));
        assert!(!inv.discard_private_key(KeyId(5)));
        assert_eq!(inv.retrieve_and_burn(KeyId(5)), None);
        assert_eq!(inv.stats().burned_total, 0);
    }

    #[test]
    fn overwrite_on_id_reuse() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        inv.store_private_key(KeyId(1), b"first").unwrap();
        inv.store_private_key(KeyId(1), b"second").unwrap();

        assert_eq!(inv.stats().vault_entries, 1);
        assert_eq!(inv.retrieve_and_burn(KeyId(1)).unwrap().as_slice(), b"second");
    }

    #[test]
    fn clones_share_state() {
        let inv = inventory(DEFAULT_CACHE_CEILING);
        let other = inv.clone();

        other.store_public_key(coin("bob", 1, Tier::Gold));
        other.store_private_key(KeyId(7), b"s").unwrap();

        assert!(inv.get_best_key("bob", Tier::Gold).is_some());
        assert!(inv.retrieve_and_burn(KeyId(7)).is_some());
    }
}
