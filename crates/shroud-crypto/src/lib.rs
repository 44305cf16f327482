//! shroud-crypto: the cryptographic core of shroudfs.
//!
//! Key hierarchy:
//! ```text
//! Passphrase ──Argon2id/PBKDF2──► data key (per-file salt, content AEAD)
//!            ──Argon2id/PBKDF2──► name master key (fixed salt)
//!                                   └─HKDF-SHA256─► 64-byte SIV key (names)
//! ```
//!
//! Content chunks use AES-256-GCM or ChaCha20-Poly1305 with a fresh random
//! 96-bit nonce per write. Filenames use the deterministic AES-SIV
//! construction from RFC 5297, which needs no nonce at all.

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod provider;
pub mod siv;

pub use aead::{generate_nonce, ContentCipher};
pub use kdf::{Argon2Params, HashAlg, Kdf, Pbkdf2Params};
pub use keys::{derive_name_master_salt, derive_siv_key, DataKey};
pub use provider::{
    EnvKeyProvider, KeyProvider, MultiKeyProvider, PassphraseKeyProvider, StaticKeyProvider,
};
pub use siv::SivEngine;

/// Size of a derived data key in bytes (256-bit).
pub const KEY_SIZE: usize = 32;

/// Nonce size shared by both content AEAD suites (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 / GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// AES-SIV key size: two 256-bit halves (S2V, then CTR).
pub const SIV_KEY_SIZE: usize = 64;

/// Synthetic IV length prepended to SIV ciphertexts.
pub const SIV_OVERHEAD: usize = 16;
