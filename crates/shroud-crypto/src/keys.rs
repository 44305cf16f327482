//! Key material containers and subkey derivation.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use shroud_core::{Error, Result};

use crate::{KEY_SIZE, SIV_KEY_SIZE};

/// HKDF info string for the filename SIV subkey. Content keys never pass
/// through HKDF; they come straight from the KDF with a per-file salt, so the
/// two key families can never collide.
const NAME_SIV_INFO: &[u8] = b"shroudfs/v1 filename siv key";

/// Fixed salt used to derive the filename master key from the passphrase.
///
/// Filename tokens must be identical across processes and mounts, so this
/// salt is a protocol constant rather than a random per-file value. Content
/// keys keep their random per-file salts.
const NAME_MASTER_SALT: [u8; 32] = *b"shroudfs/v1 filename master salt";

/// A derived symmetric key. Zeroized on drop; `Debug` redacts.
#[derive(Clone)]
pub struct DataKey {
    bytes: Vec<u8>,
}

impl DataKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The fixed salt for the filename master key.
pub fn derive_name_master_salt() -> Vec<u8> {
    NAME_MASTER_SALT.to_vec()
}

/// Expand a 32-byte master key into the 64-byte AES-SIV key for filenames.
pub fn derive_siv_key(master: &DataKey) -> Result<[u8; SIV_KEY_SIZE]> {
    if master.len() != KEY_SIZE {
        return Err(Error::validation(
            "master_key",
            format!("expected {} bytes, got {}", KEY_SIZE, master.len()),
        ));
    }
    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = [0u8; SIV_KEY_SIZE];
    hkdf.expand(NAME_SIV_INFO, &mut okm)
        .map_err(|e| Error::encryption("key derivation", format!("HKDF expand: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siv_key_is_deterministic() {
        let master = DataKey::from_bytes(vec![0x42; KEY_SIZE]);
        let k1 = derive_siv_key(&master).unwrap();
        let k2 = derive_siv_key(&master).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_masters_give_different_siv_keys() {
        let a = derive_siv_key(&DataKey::from_bytes(vec![0x11; KEY_SIZE])).unwrap();
        let b = derive_siv_key(&DataKey::from_bytes(vec![0x22; KEY_SIZE])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn siv_key_halves_differ() {
        let master = DataKey::from_bytes(vec![0x42; KEY_SIZE]);
        let key = derive_siv_key(&master).unwrap();
        assert_ne!(key[..32], key[32..]);
    }

    #[test]
    fn rejects_wrong_master_size() {
        let short = DataKey::from_bytes(vec![0u8; 16]);
        assert!(derive_siv_key(&short).is_err());
    }

    #[test]
    fn debug_redacts_key_bytes() {
        let key = DataKey::from_bytes(vec![0xAA; KEY_SIZE]);
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("170"));
    }
}
