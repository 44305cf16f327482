//! Passphrase key derivation: Argon2id (preferred) or PBKDF2-HMAC.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

use shroud_core::validation::require_in_range;
use shroud_core::{Error, Result};

use crate::keys::DataKey;

/// Accepted salt sizes in bytes.
pub const MIN_SALT_SIZE: usize = 16;
pub const MAX_SALT_SIZE: usize = 128;

/// Accepted derived-key sizes in bytes.
pub const MIN_KEY_SIZE: usize = 16;
pub const MAX_KEY_SIZE: usize = 64;

/// Hash choice for PBKDF2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlg {
    Sha256,
    Sha512,
}

/// Argon2id parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Argon2Params {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Time cost (passes over memory).
    pub iterations: u32,
    /// Lanes.
    pub parallelism: u32,
    pub salt_size: usize,
    pub key_size: usize,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 4,
            salt_size: 32,
            key_size: 32,
        }
    }
}

impl Argon2Params {
    pub fn validate(&self) -> Result<()> {
        require_in_range(self.memory_kib, "argon2.memory_kib", 8 * 1024, 4 * 1024 * 1024)?;
        require_in_range(self.iterations, "argon2.iterations", 1, 100)?;
        require_in_range(self.parallelism, "argon2.parallelism", 1, 255)?;
        require_in_range(self.salt_size, "argon2.salt_size", MIN_SALT_SIZE, MAX_SALT_SIZE)?;
        require_in_range(self.key_size, "argon2.key_size", MIN_KEY_SIZE, MAX_KEY_SIZE)?;
        Ok(())
    }
}

/// PBKDF2-HMAC parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Pbkdf2Params {
    pub hash: HashAlg,
    pub iterations: u32,
    pub salt_size: usize,
    pub key_size: usize,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            hash: HashAlg::Sha256,
            iterations: 600_000,
            salt_size: 32,
            key_size: 32,
        }
    }
}

impl Pbkdf2Params {
    pub fn validate(&self) -> Result<()> {
        require_in_range(self.iterations, "pbkdf2.iterations", 100_000, 10_000_000)?;
        require_in_range(self.salt_size, "pbkdf2.salt_size", MIN_SALT_SIZE, MAX_SALT_SIZE)?;
        require_in_range(self.key_size, "pbkdf2.key_size", MIN_KEY_SIZE, MAX_KEY_SIZE)?;
        Ok(())
    }
}

/// A validated KDF selection.
#[derive(Debug, Clone)]
pub enum Kdf {
    Argon2id(Argon2Params),
    Pbkdf2(Pbkdf2Params),
}

impl Kdf {
    pub fn validate(&self) -> Result<()> {
        match self {
            Kdf::Argon2id(p) => p.validate(),
            Kdf::Pbkdf2(p) => p.validate(),
        }
    }

    pub fn salt_size(&self) -> usize {
        match self {
            Kdf::Argon2id(p) => p.salt_size,
            Kdf::Pbkdf2(p) => p.salt_size,
        }
    }

    pub fn key_size(&self) -> usize {
        match self {
            Kdf::Argon2id(p) => p.key_size,
            Kdf::Pbkdf2(p) => p.key_size,
        }
    }

    /// Stretch `passphrase` with `salt` into a key of the configured size.
    pub fn derive(&self, passphrase: &[u8], salt: &[u8]) -> Result<DataKey> {
        if passphrase.is_empty() {
            return Err(Error::validation("passphrase", "must not be empty"));
        }
        if salt.is_empty() {
            return Err(Error::validation("salt", "must not be empty"));
        }

        match self {
            Kdf::Argon2id(params) => {
                let argon_params = Params::new(
                    params.memory_kib,
                    params.iterations,
                    params.parallelism,
                    Some(params.key_size),
                )
                .map_err(|e| Error::validation("argon2", e.to_string()))?;
                let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

                let mut key = vec![0u8; params.key_size];
                argon2
                    .hash_password_into(passphrase, salt, &mut key)
                    .map_err(|e| Error::encryption("key derivation", format!("Argon2id: {e}")))?;
                Ok(DataKey::from_bytes(key))
            }
            Kdf::Pbkdf2(params) => {
                let mut key = vec![0u8; params.key_size];
                match params.hash {
                    HashAlg::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(
                        passphrase,
                        salt,
                        params.iterations,
                        &mut key,
                    ),
                    HashAlg::Sha512 => pbkdf2::pbkdf2_hmac::<Sha512>(
                        passphrase,
                        salt,
                        params.iterations,
                        &mut key,
                    ),
                }
                Ok(DataKey::from_bytes(key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap Argon2id parameters so tests stay fast.
    pub(crate) fn fast_argon2() -> Kdf {
        Kdf::Argon2id(Argon2Params {
            memory_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
            salt_size: 16,
            key_size: 32,
        })
    }

    #[test]
    fn argon2_is_deterministic() {
        let kdf = fast_argon2();
        let k1 = kdf.derive(b"test-passphrase-123", &[1u8; 16]).unwrap();
        let k2 = kdf.derive(b"test-passphrase-123", &[1u8; 16]).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn argon2_separates_passphrases_and_salts() {
        let kdf = fast_argon2();
        let base = kdf.derive(b"passphrase-a", &[1u8; 16]).unwrap();
        let other_pass = kdf.derive(b"passphrase-b", &[1u8; 16]).unwrap();
        let other_salt = kdf.derive(b"passphrase-a", &[2u8; 16]).unwrap();
        assert_ne!(base.as_bytes(), other_pass.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
    }

    #[test]
    fn pbkdf2_both_hashes_derive() {
        for hash in [HashAlg::Sha256, HashAlg::Sha512] {
            let kdf = Kdf::Pbkdf2(Pbkdf2Params {
                hash,
                iterations: 100_000,
                salt_size: 16,
                key_size: 32,
            });
            kdf.validate().unwrap();
            let k1 = kdf.derive(b"hunter2", &[9u8; 16]).unwrap();
            let k2 = kdf.derive(b"hunter2", &[9u8; 16]).unwrap();
            assert_eq!(k1.as_bytes(), k2.as_bytes());
        }
    }

    #[test]
    fn pbkdf2_hash_choice_matters() {
        let sha256 = Kdf::Pbkdf2(Pbkdf2Params {
            hash: HashAlg::Sha256,
            iterations: 100_000,
            salt_size: 16,
            key_size: 32,
        });
        let sha512 = Kdf::Pbkdf2(Pbkdf2Params {
            hash: HashAlg::Sha512,
            iterations: 100_000,
            salt_size: 16,
            key_size: 32,
        });
        let a = sha256.derive(b"pw", &[3u8; 16]).unwrap();
        let b = sha512.derive(b"pw", &[3u8; 16]).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn rejects_empty_inputs() {
        let kdf = fast_argon2();
        assert!(kdf.derive(b"", &[1u8; 16]).is_err());
        assert!(kdf.derive(b"pw", b"").is_err());
    }

    #[test]
    fn parameter_bounds_are_enforced() {
        assert!(Argon2Params {
            memory_kib: 1024, // below 8 MiB floor
            ..Argon2Params::default()
        }
        .validate()
        .is_err());

        assert!(Argon2Params {
            iterations: 101,
            ..Argon2Params::default()
        }
        .validate()
        .is_err());

        assert!(Pbkdf2Params {
            iterations: 99_999,
            ..Pbkdf2Params::default()
        }
        .validate()
        .is_err());

        assert!(Pbkdf2Params {
            key_size: 65,
            ..Pbkdf2Params::default()
        }
        .validate()
        .is_err());

        Argon2Params::default().validate().unwrap();
        Pbkdf2Params::default().validate().unwrap();
    }
}
