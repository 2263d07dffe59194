//! Authenticated encryption for record payloads.
//!
//! Payloads are encrypted with AES-256-GCM under a secret derived from the
//! wallet master key. The output format is `nonce (12) || ciphertext ||
//! tag (16)`; a fresh CSPRNG nonce is generated for every call. The same
//! box encrypts payloads at rest and in transit; the two uses are toggled
//! independently by the ledger and sync configurations.

use crate::error::{StoreError, StoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Secret key material for the crypto box.
///
/// Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from exactly 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StoreError::malformed(format!(
                "invalid key size: expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives the record-encryption secret from the wallet master key
    /// using HKDF-SHA256.
    ///
    /// The salt should be random, stored alongside the ledger, and stable
    /// across opens. The master key already carries high entropy, so HKDF
    /// is the appropriate derivation here (no password stretching).
    pub fn derive_from_master_key(master: &[u8], salt: &[u8]) -> StoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        if master.is_empty() {
            return Err(StoreError::unknown("master key has no secret material"));
        }

        let hk = Hkdf::<Sha256>::new(Some(salt), master);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"vaultkv-record-key-v1", &mut bytes)
            .map_err(|_| StoreError::unknown("HKDF expand failed"))?;

        Ok(Self { bytes })
    }

    /// Returns the key as a byte slice. Never log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and decrypts record payloads.
pub struct CryptoBox {
    cipher: Aes256Gcm,
}

impl CryptoBox {
    /// Creates a crypto box from a secret key.
    #[must_use]
    pub fn new(key: SecretKey) -> Self {
        // Infallible: SecretKey is always exactly the AES-256 key size.
        let key_array = GenericArray::from_slice(key.as_bytes());
        let cipher = Aes256Gcm::new(key_array);
        Self { cipher }
    }

    /// Encrypts a payload, returning `nonce || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StoreError::unknown("encryption failed"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);

        Ok(result)
    }

    /// Decrypts a payload produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedData`] if the buffer is too short to contain
    /// a nonce and tag; [`StoreError::Unknown`] if authentication fails.
    pub fn decrypt(&self, data: &[u8]) -> StoreResult<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StoreError::malformed(
                "ciphertext too short to contain nonce and tag",
            ));
        }

        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| StoreError::unknown("decryption failed"))
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip() {
        let cryptobox = CryptoBox::new(SecretKey::generate());
        let plaintext = b"spendable balance";
        let ciphertext = cryptobox.encrypt(plaintext).unwrap();

        assert_ne!(&ciphertext[NONCE_SIZE..], plaintext);
        assert_eq!(cryptobox.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let cryptobox = CryptoBox::new(SecretKey::generate());
        let ciphertext = cryptobox.encrypt(b"").unwrap();
        assert_eq!(ciphertext.len(), NONCE_SIZE + TAG_SIZE);
        assert_eq!(cryptobox.decrypt(&ciphertext).unwrap(), b"");
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let cryptobox = CryptoBox::new(SecretKey::generate());
        let ct1 = cryptobox.encrypt(b"same").unwrap();
        let ct2 = cryptobox.encrypt(b"same").unwrap();
        assert_ne!(ct1, ct2);
        assert_ne!(ct1[..NONCE_SIZE], ct2[..NONCE_SIZE]);
    }

    #[test]
    fn wrong_key_fails() {
        let box1 = CryptoBox::new(SecretKey::generate());
        let box2 = CryptoBox::new(SecretKey::generate());
        let ciphertext = box1.encrypt(b"secret").unwrap();
        assert!(box2.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cryptobox = CryptoBox::new(SecretKey::generate());
        let mut ciphertext = cryptobox.encrypt(b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(cryptobox.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn too_short_buffer_is_malformed() {
        let cryptobox = CryptoBox::new(SecretKey::generate());
        let err = cryptobox.decrypt(&[0u8; NONCE_SIZE]).unwrap_err();
        assert!(matches!(err, StoreError::MalformedData { .. }));
    }

    #[test]
    fn derivation_is_deterministic() {
        let k1 = SecretKey::derive_from_master_key(b"master", b"salt").unwrap();
        let k2 = SecretKey::derive_from_master_key(b"master", b"salt").unwrap();
        let k3 = SecretKey::derive_from_master_key(b"master", b"other-salt").unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn empty_master_key_rejected() {
        assert!(SecretKey::derive_from_master_key(b"", b"salt").is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_any_bytes(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let cryptobox = CryptoBox::new(SecretKey::from_bytes(&[7u8; KEY_SIZE]).unwrap());
            let ciphertext = cryptobox.encrypt(&data).unwrap();
            prop_assert_eq!(cryptobox.decrypt(&ciphertext).unwrap(), data);
        }
    }
}
