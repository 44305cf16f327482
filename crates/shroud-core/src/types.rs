use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Content cipher selection. Stored as a single byte in file headers.
///
/// `Auto` is a configuration-only value: it resolves to AES-256-GCM before
/// anything touches disk, so headers only ever carry the two concrete suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherSuite {
    #[default]
    Auto,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Wire code written into file headers.
    pub fn as_u8(self) -> u8 {
        match self {
            CipherSuite::Auto => 0,
            CipherSuite::Aes256Gcm => 1,
            CipherSuite::ChaCha20Poly1305 => 2,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            0 => Ok(CipherSuite::Auto),
            1 => Ok(CipherSuite::Aes256Gcm),
            2 => Ok(CipherSuite::ChaCha20Poly1305),
            other => Err(Error::UnsupportedCipher(other)),
        }
    }

    /// Collapse `Auto` to the concrete suite used for new files.
    pub fn resolve(self) -> CipherSuite {
        match self {
            CipherSuite::Auto => CipherSuite::Aes256Gcm,
            concrete => concrete,
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CipherSuite::Auto => "auto",
            CipherSuite::Aes256Gcm => "aes-256-gcm",
            CipherSuite::ChaCha20Poly1305 => "chacha20-poly1305",
        };
        f.write_str(name)
    }
}
