//! Key providers: the capability that turns salts into keys.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use shroud_core::{Error, Result};

use crate::kdf::Kdf;
use crate::keys::DataKey;

/// Supplies encryption keys and fresh salts.
///
/// `candidate_keys` exists for decryption fallback during key rotation: the
/// default implementation returns just the primary key, while
/// [`MultiKeyProvider`] returns one candidate per wrapped provider, in order.
pub trait KeyProvider: Send + Sync {
    /// Derive the encryption key for the given salt.
    fn derive_key(&self, salt: &[u8]) -> Result<DataKey>;

    /// Generate a fresh random salt (CSPRNG).
    fn generate_salt(&self) -> Result<Vec<u8>>;

    /// Keys to try, in order, when opening an existing file.
    fn candidate_keys(&self, salt: &[u8]) -> Result<Vec<DataKey>> {
        Ok(vec![self.derive_key(salt)?])
    }
}

/// Passphrase-based provider over a validated KDF selection.
pub struct PassphraseKeyProvider {
    passphrase: SecretString,
    kdf: Kdf,
}

impl PassphraseKeyProvider {
    pub fn new(passphrase: SecretString, kdf: Kdf) -> Result<Self> {
        if passphrase.expose_secret().is_empty() {
            return Err(Error::validation("passphrase", "must not be empty"));
        }
        kdf.validate()?;
        Ok(Self { passphrase, kdf })
    }

    pub fn kdf(&self) -> &Kdf {
        &self.kdf
    }
}

impl KeyProvider for PassphraseKeyProvider {
    fn derive_key(&self, salt: &[u8]) -> Result<DataKey> {
        self.kdf
            .derive(self.passphrase.expose_secret().as_bytes(), salt)
    }

    fn generate_salt(&self) -> Result<Vec<u8>> {
        let mut salt = vec![0u8; self.kdf.salt_size()];
        rand::thread_rng().fill_bytes(&mut salt);
        Ok(salt)
    }
}

impl std::fmt::Debug for PassphraseKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseKeyProvider")
            .field("passphrase", &"[REDACTED]")
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Provider around a pre-derived raw key. The salt is ignored on
/// derivation since the key never changes; salts are still generated so
/// file headers stay well-formed.
pub struct StaticKeyProvider {
    key: DataKey,
    salt_size: usize,
}

impl StaticKeyProvider {
    pub fn new(key: Vec<u8>) -> Result<Self> {
        if key.len() != crate::KEY_SIZE {
            return Err(Error::validation(
                "key",
                format!("expected {} bytes, got {}", crate::KEY_SIZE, key.len()),
            ));
        }
        Ok(Self {
            key: DataKey::from_bytes(key),
            salt_size: 32,
        })
    }
}

impl KeyProvider for StaticKeyProvider {
    fn derive_key(&self, _salt: &[u8]) -> Result<DataKey> {
        Ok(self.key.clone())
    }

    fn generate_salt(&self) -> Result<Vec<u8>> {
        let mut salt = vec![0u8; self.salt_size];
        rand::thread_rng().fill_bytes(&mut salt);
        Ok(salt)
    }
}

impl std::fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyProvider")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Provider reading a hex-encoded 256-bit key from an environment variable,
/// resolved on every derivation so rotation only needs an env update.
#[derive(Debug)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeyProvider for EnvKeyProvider {
    fn derive_key(&self, _salt: &[u8]) -> Result<DataKey> {
        let raw = std::env::var(&self.var).map_err(|_| {
            Error::validation("key_env", format!("environment variable {} not set", self.var))
        })?;
        let key = decode_hex(raw.trim())?;
        if key.len() != crate::KEY_SIZE {
            return Err(Error::validation(
                "key_env",
                format!(
                    "{} must hold {} hex characters, got {}",
                    self.var,
                    crate::KEY_SIZE * 2,
                    raw.trim().len()
                ),
            ));
        }
        Ok(DataKey::from_bytes(key))
    }

    fn generate_salt(&self) -> Result<Vec<u8>> {
        let mut salt = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Ok(salt)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::validation("key_env", "odd-length hex string"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| Error::validation("key_env", format!("invalid hex: {e}")))
        })
        .collect()
}

/// Ordered list of providers for key rotation.
///
/// Encryption and salt generation always use the first provider; decryption
/// walks the list until a key authenticates. The order is configuration, not
/// state: it never changes at runtime.
pub struct MultiKeyProvider {
    providers: Vec<Arc<dyn KeyProvider>>,
}

impl MultiKeyProvider {
    pub fn new(providers: Vec<Arc<dyn KeyProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::validation(
                "providers",
                "at least one key provider is required",
            ));
        }
        Ok(Self { providers })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl KeyProvider for MultiKeyProvider {
    fn derive_key(&self, salt: &[u8]) -> Result<DataKey> {
        self.providers[0].derive_key(salt)
    }

    fn generate_salt(&self) -> Result<Vec<u8>> {
        self.providers[0].generate_salt()
    }

    fn candidate_keys(&self, salt: &[u8]) -> Result<Vec<DataKey>> {
        let mut keys = Vec::with_capacity(self.providers.len());
        let mut last_err = None;
        for provider in &self.providers {
            match provider.derive_key(salt) {
                Ok(key) => keys.push(key),
                Err(e) => last_err = Some(e),
            }
        }
        if keys.is_empty() {
            return Err(last_err.unwrap_or(Error::Auth));
        }
        Ok(keys)
    }
}
