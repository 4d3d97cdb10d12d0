//! AQM cryptographic primitives.
//!
//! # Key Lifecycle
//!
//! ```text
//! KeyMintEngine::generate_keypair(tier)
//!        │
//!        ├── public half ──► Coin (signed binding) ──► broker inventory
//!        │
//!        └── secret half ──► VaultSealer::seal ──► client vault
//!                                                     │
//!                          packet arrives ────────────┘
//!                                                     ▼
//!                                       retrieve_and_burn (open once)
//! ```
//!
//! GOLD and SILVER coins use Kyber-768; BRONZE coins use X25519. Secrets are
//! never held at rest in raw form: the vault stores them sealed with
//! XChaCha20-Poly1305 under a per-process key, with the key id bound as
//! associated data so a sealed blob cannot be replayed under another id.
//!
//! # Security
//!
//! - Secret buffers are zeroized on drop.
//! - [`KeyMintEngine::sign_key`] is a deterministic binding tag, not a
//!   signature. Deployments that need authenticity must substitute a real
//!   signature scheme.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod mint;
pub mod seal;

pub use error::CryptoError;
pub use mint::{KYBER768_PUBLIC_KEY_BYTES, KYBER768_SECRET_KEY_BYTES, KeyMintEngine, KeyPair};
pub use seal::{SealedSecret, VaultSealer};
