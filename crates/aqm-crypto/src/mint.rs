//! Tiered one-time keypair generation.

use aqm_proto::Tier;
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{PublicKey as _, SecretKey as _};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::CryptoError;

/// Kyber-768 public key length in bytes.
pub const KYBER768_PUBLIC_KEY_BYTES: usize = 1184;

/// Kyber-768 secret key length in bytes.
pub const KYBER768_SECRET_KEY_BYTES: usize = 2400;

/// X25519 key length in bytes (public and secret).
const X25519_KEY_BYTES: usize = 32;

/// Domain separator for the coin binding tag.
const BINDING_LABEL: &[u8] = b"aqm/coin-binding/v1";

/// A freshly minted keypair.
///
/// The secret half is zeroized on drop.
pub struct KeyPair {
    /// Tier the pair was minted for.
    pub tier: Tier,
    /// Public key, lowercase hex.
    pub public_hex: String,
    secret: Vec<u8>,
}

impl KeyPair {
    /// Raw secret key bytes.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Secret key as lowercase hex.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret))
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("tier", &self.tier)
            .field("public_hex", &self.public_hex)
            .finish_non_exhaustive()
    }
}

/// Generates one keypair per request, algorithm chosen by tier.
///
/// Holds no mutable state; share it behind an `Arc` across tasks.
#[derive(Debug)]
pub struct KeyMintEngine {
    _initialized: (),
}

impl KeyMintEngine {
    /// Run the one-time self-test and return a ready engine.
    ///
    /// # Errors
    ///
    /// `CryptoError::InitFailed` if the OS random source is unreadable or a
    /// test keypair comes back with unexpected sizes. Callers must treat this
    /// as fatal.
    pub fn new() -> Result<Self, CryptoError> {
        let mut probe = [0u8; 32];
        getrandom::fill(&mut probe)
            .map_err(|e| CryptoError::InitFailed(format!("OS random source: {e}")))?;

        if kyber768::public_key_bytes() != KYBER768_PUBLIC_KEY_BYTES
            || kyber768::secret_key_bytes() != KYBER768_SECRET_KEY_BYTES
        {
            return Err(CryptoError::InitFailed("unexpected Kyber-768 parameter sizes".into()));
        }

        let engine = Self { _initialized: () };
        for tier in [Tier::Gold, Tier::Bronze] {
            engine
                .generate_keypair(tier)
                .map_err(|e| CryptoError::InitFailed(format!("self-test keygen: {e}")))?;
        }

        Ok(engine)
    }

    /// Generate a keypair for `tier`.
    ///
    /// GOLD and SILVER use Kyber-768; BRONZE uses X25519.
    ///
    /// # Errors
    ///
    /// `CryptoError::KeygenFailed` if the primitive fails or returns keys of
    /// the wrong size. The caller skips that slot rather than publishing a
    /// broken coin.
    pub fn generate_keypair(&self, tier: Tier) -> Result<KeyPair, CryptoError> {
        match tier {
            Tier::Gold | Tier::Silver => {
                let (pk, sk) = kyber768::keypair();
                let pair = KeyPair {
                    tier,
                    public_hex: hex::encode(pk.as_bytes()),
                    secret: sk.as_bytes().to_vec(),
                };
                check_sizes(&pair, KYBER768_PUBLIC_KEY_BYTES, KYBER768_SECRET_KEY_BYTES)?;
                Ok(pair)
            },
            Tier::Bronze => {
                let mut seed = Zeroizing::new([0u8; X25519_KEY_BYTES]);
                getrandom::fill(&mut *seed)
                    .map_err(|e| CryptoError::KeygenFailed { tier, reason: e.to_string() })?;

                let secret = StaticSecret::from(*seed);
                let public = X25519PublicKey::from(&secret);
                let pair = KeyPair {
                    tier,
                    public_hex: hex::encode(public.as_bytes()),
                    secret: secret.to_bytes().to_vec(),
                };
                check_sizes(&pair, X25519_KEY_BYTES, X25519_KEY_BYTES)?;
                Ok(pair)
            },
        }
    }

    /// Deterministic binding tag over a public key.
    ///
    /// `hex(SHA-256(label || tier || pk))`, where `pk` is the decoded key
    /// bytes (or the raw text if `pk_hex` is not valid hex).
    pub fn sign_key(&self, pk_hex: &str, tier: Tier) -> String {
        let pk = hex::decode(pk_hex).unwrap_or_else(|_| pk_hex.as_bytes().to_vec());

        let mut hasher = Sha256::new();
        hasher.update(BINDING_LABEL);
        hasher.update([tier.to_u8()]);
        hasher.update(&pk);
        hex::encode(hasher.finalize())
    }
}

fn check_sizes(pair: &KeyPair, public_len: usize, secret_len: usize) -> Result<(), CryptoError> {
    if pair.public_hex.len() != public_len * 2 || pair.secret.len() != secret_len {
        return Err(CryptoError::KeygenFailed {
            tier: pair.tier,
            reason: format!(
                "key size mismatch: pk {} bytes, sk {} bytes",
                pair.public_hex.len() / 2,
                pair.secret.len()
            ),
        });
    }
    Ok(())
}
