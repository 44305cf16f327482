//! Content AEAD: AES-256-GCM or ChaCha20-Poly1305 behind one enum.
//!
//! Both suites use 96-bit nonces and 128-bit tags, so the on-disk chunk
//! layout is identical regardless of suite. Decryption failures collapse to
//! `Error::Auth` without detail, as the underlying AEAD crates intend.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;

use shroud_core::{CipherSuite, Error, Result};

use crate::keys::DataKey;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A content cipher bound to one data key.
pub enum ContentCipher {
    AesGcm(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
}

impl ContentCipher {
    /// Build a cipher for the given suite. `Auto` binds to AES-256-GCM.
    pub fn new(suite: CipherSuite, key: &DataKey) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::validation(
                "key",
                format!("{} requires a {}-byte key, got {}", suite, KEY_SIZE, key.len()),
            ));
        }
        match suite.resolve() {
            CipherSuite::Aes256Gcm => Ok(ContentCipher::AesGcm(
                Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|e| Error::encryption("cipher setup", e.to_string()))?,
            )),
            CipherSuite::ChaCha20Poly1305 => Ok(ContentCipher::ChaCha(
                ChaCha20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|e| Error::encryption("cipher setup", e.to_string()))?,
            )),
            CipherSuite::Auto => unreachable!("resolve() never returns Auto"),
        }
    }

    /// Encrypt `plaintext`; the result is `ciphertext || tag`.
    pub fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(Error::validation(
                "nonce",
                format!("expected {} bytes, got {}", NONCE_SIZE, nonce.len()),
            ));
        }
        let result = match self {
            ContentCipher::AesGcm(cipher) => {
                cipher.encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext)
            }
            ContentCipher::ChaCha(cipher) => {
                cipher.encrypt(chacha20poly1305::Nonce::from_slice(nonce), plaintext)
            }
        };
        result.map_err(|_| Error::encryption("encrypt", "AEAD encryption failed"))
    }

    /// Decrypt `ciphertext || tag`. Any tampering yields `Error::Auth`.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(Error::validation(
                "nonce",
                format!("expected {} bytes, got {}", NONCE_SIZE, nonce.len()),
            ));
        }
        let result = match self {
            ContentCipher::AesGcm(cipher) => {
                cipher.decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
            }
            ContentCipher::ChaCha(cipher) => {
                cipher.decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
            }
        };
        result.map_err(|_| Error::Auth)
    }

    pub const fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    /// Authentication tag bytes appended to every ciphertext.
    pub const fn overhead(&self) -> usize {
        TAG_SIZE
    }
}

/// Fresh random nonce from the thread-local CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> DataKey {
        DataKey::from_bytes(vec![0x5A; KEY_SIZE])
    }

    #[test]
    fn roundtrip_both_suites() {
        for suite in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
            let cipher = ContentCipher::new(suite, &test_key()).unwrap();
            let nonce = generate_nonce();
            let ct = cipher.encrypt(&nonce, b"attack at dawn").unwrap();
            assert_eq!(ct.len(), b"attack at dawn".len() + TAG_SIZE);
            let pt = cipher.decrypt(&nonce, &ct).unwrap();
            assert_eq!(pt, b"attack at dawn");
        }
    }

    #[test]
    fn auto_is_aes_gcm_compatible() {
        let auto = ContentCipher::new(CipherSuite::Auto, &test_key()).unwrap();
        let aes = ContentCipher::new(CipherSuite::Aes256Gcm, &test_key()).unwrap();
        let nonce = [7u8; NONCE_SIZE];
        let ct = auto.encrypt(&nonce, b"payload").unwrap();
        assert_eq!(aes.decrypt(&nonce, &ct).unwrap(), b"payload");
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let cipher = ContentCipher::new(CipherSuite::Aes256Gcm, &test_key()).unwrap();
        let nonce = generate_nonce();
        let ct = cipher.encrypt(&nonce, b"").unwrap();
        assert_eq!(ct.len(), TAG_SIZE);
        assert_eq!(cipher.decrypt(&nonce, &ct).unwrap(), b"");
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let cipher = ContentCipher::new(CipherSuite::ChaCha20Poly1305, &test_key()).unwrap();
        let nonce = generate_nonce();
        let ct = cipher.encrypt(&nonce, b"secret data").unwrap();
        for i in 0..ct.len() {
            let mut copy = ct.clone();
            copy[i] ^= 0x01;
            assert!(matches!(cipher.decrypt(&nonce, &copy), Err(Error::Auth)));
        }
        // untouched still decrypts
        let pt = cipher.decrypt(&nonce, &ct).unwrap();
        assert_eq!(pt, b"secret data");
        // tampered nonce fails too
        let mut bad_nonce = nonce;
        bad_nonce[0] ^= 0x80;
        assert!(matches!(cipher.decrypt(&bad_nonce, &ct), Err(Error::Auth)));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let c1 = ContentCipher::new(CipherSuite::Aes256Gcm, &test_key()).unwrap();
        let c2 = ContentCipher::new(
            CipherSuite::Aes256Gcm,
            &DataKey::from_bytes(vec![0xA5; KEY_SIZE]),
        )
        .unwrap();
        let nonce = generate_nonce();
        let ct = c1.encrypt(&nonce, b"secret").unwrap();
        assert!(matches!(c2.decrypt(&nonce, &ct), Err(Error::Auth)));
    }

    #[test]
    fn rejects_bad_nonce_and_key_sizes() {
        let cipher = ContentCipher::new(CipherSuite::Aes256Gcm, &test_key()).unwrap();
        assert!(cipher.encrypt(&[0u8; 8], b"x").is_err());
        assert!(cipher.decrypt(&[0u8; 16], b"xxxxxxxxxxxxxxxxx").is_err());
        assert!(ContentCipher::new(
            CipherSuite::Aes256Gcm,
            &DataKey::from_bytes(vec![0u8; 16])
        )
        .is_err());
    }

    #[test]
    fn nonce_generation_is_not_constant() {
        assert_ne!(generate_nonce(), generate_nonce());
    }
}
