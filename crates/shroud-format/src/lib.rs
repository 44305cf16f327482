//! shroud-format: on-disk codecs for encrypted files.
//!
//! File layout (all integers little-endian):
//! ```text
//! ┌─────────────────────────────────────┐
//! │ File header                         │  magic, version, cipher, salt, nonce
//! ├─────────────────────────────────────┤
//! │ Chunk index (fixed 20 KiB region)   │  chunk_size, count, offsets, sizes
//! ├─────────────────────────────────────┤
//! │ Chunk 0                             │  plaintext_size, nonce, ct ‖ tag
//! ├─────────────────────────────────────┤
//! │ Chunk 1 …                           │
//! └─────────────────────────────────────┘
//! ```
//! The index region is always written in full, so chunk 0 starts at a
//! deterministic offset (`header.encoded_len() + CHUNK_INDEX_RESERVED`).

pub mod chunk;
pub mod header;
pub mod index;

pub use chunk::ChunkRecordHeader;
pub use header::FileHeader;
pub use index::ChunkIndex;

/// Magic bytes identifying encrypted files: ASCII "ENCR".
pub const MAGIC: u32 = 0x454E_4352;

/// Current file format version.
pub const FORMAT_VERSION: u8 = 1;

/// Reserved size of the chunk index region: room for ~1700 chunks.
pub const CHUNK_INDEX_RESERVED: usize = 20 * 1024;

/// Engine-level chunk size floor; the configuration layer is stricter.
pub const MIN_CHUNK_SIZE: u32 = 64;

/// Largest supported chunk size (16 MiB).
pub const MAX_CHUNK_SIZE: u32 = 16 * 1024 * 1024;
