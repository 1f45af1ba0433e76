//! Authenticated symmetric encryption for credential material.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per message. The nonce is
//! stored alongside the ciphertext; the key never leaves process memory.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::{ControlError, Result};

pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt `plaintext`, returning `(nonce, ciphertext)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut nonce = [0u8; 12];
        getrandom::fill(&mut nonce)
            .map_err(|e| ControlError::Internal(format!("rng failure: {e}")))?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ControlError::Internal("encryption failed".into()))?;
        Ok((nonce.to_vec(), ciphertext))
    }

    /// Decrypt; any tampering, truncation, or key mismatch surfaces as
    /// `ControlError::Decrypt` — there is no plaintext fallback.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != 12 {
            return Err(ControlError::Decrypt);
        }
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ControlError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_box() -> SecretBox {
        SecretBox::new(&[42u8; 32])
    }

    #[test]
    fn round_trip() {
        let sb = secret_box();
        let (nonce, ct) = sb.encrypt(b"hunter2").unwrap();
        assert_eq!(nonce.len(), 12);
        assert_ne!(ct, b"hunter2");
        assert_eq!(sb.decrypt(&nonce, &ct).unwrap(), b"hunter2");
    }

    #[test]
    fn nonces_are_unique_per_message() {
        let sb = secret_box();
        let (n1, _) = sb.encrypt(b"same").unwrap();
        let (n2, _) = sb.encrypt(b"same").unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let sb = secret_box();
        let (nonce, mut ct) = sb.encrypt(b"hunter2").unwrap();
        ct[0] ^= 0xff;
        assert!(matches!(
            sb.decrypt(&nonce, &ct).unwrap_err(),
            ControlError::Decrypt
        ));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sb = secret_box();
        let (nonce, ct) = sb.encrypt(b"hunter2").unwrap();
        let other = SecretBox::new(&[7u8; 32]);
        assert!(matches!(
            other.decrypt(&nonce, &ct).unwrap_err(),
            ControlError::Decrypt
        ));
    }

    #[test]
    fn bad_nonce_length_is_rejected() {
        let sb = secret_box();
        let (_, ct) = sb.encrypt(b"hunter2").unwrap();
        assert!(matches!(
            sb.decrypt(&[0u8; 4], &ct).unwrap_err(),
            ControlError::Decrypt
        ));
    }
}
