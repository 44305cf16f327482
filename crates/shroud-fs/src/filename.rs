//! Filename and path translation between the plaintext and encrypted worlds.
//!
//! Three modes:
//! - `Plain`: identity.
//! - `Deterministic`: per-component AES-SIV, URL-safe base64 without padding;
//!   the same name under the same key always yields the same token, so paths
//!   stay resolvable without any stored state.
//! - `Random`: per-component UUID tokens backed by the persistent catalog.
//!
//! Reserved components (``""``, ``"."``, ``".."``) always pass through, and a
//! path with k real components always maps to k components.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

use shroud_core::{Error, Result};
use shroud_crypto::SivEngine;

use crate::catalog::Catalog;
use crate::vfs::Vfs;

/// Virtual path component separator.
pub const SEPARATOR: char = '/';

/// A filename translator in one of the three modes.
pub enum NameCipher {
    Plain,
    Deterministic(DeterministicNames),
    Random(RandomNames),
}

impl NameCipher {
    pub fn encrypt_component(&self, plaintext: &str) -> Result<String> {
        if is_reserved(plaintext) {
            return Ok(plaintext.to_owned());
        }
        match self {
            NameCipher::Plain => Ok(plaintext.to_owned()),
            NameCipher::Deterministic(names) => names.encrypt(plaintext),
            NameCipher::Random(names) => names.encrypt(plaintext),
        }
    }

    pub fn decrypt_component(&self, stored: &str) -> Result<String> {
        if is_reserved(stored) {
            return Ok(stored.to_owned());
        }
        match self {
            NameCipher::Plain => Ok(stored.to_owned()),
            NameCipher::Deterministic(names) => names.decrypt(stored),
            NameCipher::Random(names) => names.decrypt(stored),
        }
    }

    /// Translate a whole virtual path, component by component.
    pub fn encrypt_path(&self, path: &str) -> Result<String> {
        self.map_path(path, |c| self.encrypt_component(c))
    }

    pub fn decrypt_path(&self, path: &str) -> Result<String> {
        self.map_path(path, |c| self.decrypt_component(c))
    }

    fn map_path<F>(&self, path: &str, translate: F) -> Result<String>
    where
        F: Fn(&str) -> Result<String>,
    {
        if path.is_empty() || path == "." {
            return Ok(path.to_owned());
        }
        let translated: Result<Vec<String>> =
            path.split(SEPARATOR).map(|part| translate(part)).collect();
        Ok(translated?.join(&SEPARATOR.to_string()))
    }
}

fn is_reserved(component: &str) -> bool {
    component.is_empty() || component == "." || component == ".."
}

// ── Deterministic mode ────────────────────────────────────────────────────

pub struct DeterministicNames {
    siv: SivEngine,
    preserve_extensions: bool,
}

impl DeterministicNames {
    pub fn new(siv_key: &[u8], preserve_extensions: bool) -> Result<Self> {
        Ok(Self {
            siv: SivEngine::new(siv_key)?,
            preserve_extensions,
        })
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let (base, ext) = self.split_extension(plaintext);
        if base.is_empty() {
            return Ok(plaintext.to_owned());
        }
        let blob = self.siv.encrypt(base.as_bytes(), &[])?;
        let encoded = URL_SAFE_NO_PAD.encode(&blob);
        Ok(match ext {
            Some(ext) => format!("{encoded}{ext}"),
            None => encoded,
        })
    }

    fn decrypt(&self, stored: &str) -> Result<String> {
        let (base, ext) = self.split_extension(stored);
        if base.is_empty() {
            return Ok(stored.to_owned());
        }
        let blob = URL_SAFE_NO_PAD
            .decode(base)
            .map_err(|e| Error::corruption(format!("filename token decode: {e}")))?;
        let plaintext = self.siv.decrypt(&blob, &[])?;
        let name = String::from_utf8(plaintext)
            .map_err(|_| Error::corruption("decrypted filename is not UTF-8"))?;
        Ok(match ext {
            Some(ext) => format!("{name}{ext}"),
            None => name,
        })
    }

    /// Split at the last `.`, keeping the dot with the extension. A leading
    /// dot with no other dot (`.bashrc`) is not an extension, so dotfiles
    /// are encrypted whole.
    fn split_extension<'a>(&self, name: &'a str) -> (&'a str, Option<&'a str>) {
        if !self.preserve_extensions {
            return (name, None);
        }
        match name.rfind('.') {
            Some(idx) if idx > 0 => (&name[..idx], Some(&name[idx..])),
            _ => (name, None),
        }
    }
}

// ── Random mode ───────────────────────────────────────────────────────────

pub struct RandomNames {
    catalog: Arc<Catalog>,
    vfs: Arc<dyn Vfs>,
}

impl RandomNames {
    pub fn new(catalog: Arc<Catalog>, vfs: Arc<dyn Vfs>) -> Self {
        Self { catalog, vfs }
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        if let Some(token) = self.catalog.token_for(plaintext) {
            return Ok(token);
        }
        let token = Uuid::new_v4().to_string();
        self.catalog
            .insert(self.vfs.as_ref(), token.clone(), plaintext.to_owned())?;
        Ok(token)
    }

    fn decrypt(&self, token: &str) -> Result<String> {
        self.catalog
            .plaintext_for(token)
            .ok_or_else(|| Error::UnknownToken(token.to_owned()))
    }
}
