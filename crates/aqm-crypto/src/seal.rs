//! At-rest sealing for vault secrets using `XChaCha20-Poly1305`.
//!
//! Each sealer owns one random 32-byte key for the lifetime of the process.
//! Every secret gets a fresh random nonce and is bound to its key id through
//! the AEAD associated data.

use aqm_proto::KeyId;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::{Zeroize, Zeroizing};

use crate::CryptoError;

/// `XChaCha20` nonce size.
const NONCE_SIZE: usize = 24;

/// A sealed vault entry.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl SealedSecret {
    /// Sealed length including the authentication tag.
    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    /// True if nothing was sealed.
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

impl std::fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecret").field("len", &self.ciphertext.len()).finish()
    }
}

/// Seals and opens vault secrets.
pub struct VaultSealer {
    key: [u8; 32],
}

impl VaultSealer {
    /// Create a sealer with a fresh random key.
    ///
    /// # Errors
    ///
    /// `CryptoError::Rng` if the OS random source fails.
    pub fn new() -> Result<Self, CryptoError> {
        let mut key = [0u8; 32];
        getrandom::fill(&mut key).map_err(|e| CryptoError::Rng(e.to_string()))?;
        Ok(Self { key })
    }

    /// Create a sealer with a caller-provided key.
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Seal `secret` for `key_id`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Rng` if no nonce could be drawn
    /// - `CryptoError::SealFailed` if the AEAD rejects the input
    pub fn seal(&self, key_id: KeyId, secret: &[u8]) -> Result<SealedSecret, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce).map_err(|e| CryptoError::Rng(e.to_string()))?;

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let aad = key_id.to_be_bytes();
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: secret, aad: &aad })
            .map_err(|_| CryptoError::SealFailed)?;

        Ok(SealedSecret { nonce, ciphertext })
    }

    /// Open a sealed secret for `key_id`.
    ///
    /// # Errors
    ///
    /// `CryptoError::OpenFailed` if the key id does not match or the blob was
    /// modified.
    pub fn open(
        &self,
        key_id: KeyId,
        sealed: &SealedSecret,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let aad = key_id.to_be_bytes();
        cipher
            .decrypt(
                XNonce::from_slice(&sealed.nonce),
                Payload { msg: &sealed.ciphertext, aad: &aad },
            )
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::OpenFailed)
    }
}

impl Drop for VaultSealer {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for VaultSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSealer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn sealed_form_is_not_raw_secret() {
        let sealer = VaultSealer::with_key([7; 32]);
        let secret = b"one-time secret key material";

        let sealed = sealer.seal(KeyId(1), secret).unwrap();
        assert_eq!(sealed.len(), secret.len() + 16);
        assert!(!sealed.ciphertext.windows(secret.len()).any(|w| w == secret));

        let opened = sealer.open(KeyId(1), &sealed).unwrap();
        assert_eq!(opened.as_slice(), secret);
    }

    #[test]
    fn open_under_other_key_id_fails() {
        let sealer = VaultSealer::with_key([7; 32]);
        let sealed = sealer.seal(KeyId(1), b"secret").unwrap();

        assert_eq!(sealer.open(KeyId(2), &sealed), Err(CryptoError::OpenFailed));
    }

    #[test]
    fn open_with_other_sealer_fails() {
        let sealed = VaultSealer::with_key([1; 32]).seal(KeyId(9), b"secret").unwrap();
        let other = VaultSealer::with_key([2; 32]);

        assert_eq!(other.open(KeyId(9), &sealed), Err(CryptoError::OpenFailed));
    }

    #[test]
    fn tampered_blob_fails() {
        let sealer = VaultSealer::new().unwrap();
        let mut sealed = sealer.seal(KeyId(3), b"secret").unwrap();
        sealed.ciphertext[0] ^= 0x01;

        assert_eq!(sealer.open(KeyId(3), &sealed), Err(CryptoError::OpenFailed));
    }

    proptest! {
        #[test]
        fn sealed_blob_is_bound_to_its_key_id(
            kid in any::<u64>(),
            other in any::<u64>(),
            secret in prop::collection::vec(any::<u8>(), 0..128),
        ) {
            prop_assume!(kid != other);
            let sealer = VaultSealer::with_key([5; 32]);
            let sealed = sealer.seal(KeyId(kid), &secret).unwrap();

            prop_assert_eq!(sealer.open(KeyId(other), &sealed), Err(CryptoError::OpenFailed));
            let opened = sealer.open(KeyId(kid), &sealed).unwrap();
            prop_assert_eq!(opened.as_slice(), &secret[..]);
        }
    }
}
