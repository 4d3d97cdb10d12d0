//! Cryptographic error types.

use aqm_proto::Tier;
use thiserror::Error;

/// Errors from key minting and vault sealing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Engine self-test failed at construction. Fatal: the process must not
    /// mint keys with a crypto subsystem in an unknown state.
    #[error("crypto initialization failed: {0}")]
    InitFailed(String),

    /// Key generation failed for one slot.
    #[error("keygen failed for {tier}: {reason}")]
    KeygenFailed {
        /// Tier being minted
        tier: Tier,
        /// Failure detail
        reason: String,
    },

    /// OS randomness unavailable.
    #[error("random source failed: {0}")]
    Rng(String),

    /// Sealing a secret failed.
    #[error("seal failed")]
    SealFailed,

    /// Sealed secret did not authenticate (wrong key id or tampered).
    #[error("sealed secret failed authentication")]
    OpenFailed,
}
