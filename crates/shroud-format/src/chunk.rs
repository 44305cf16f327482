//! Per-chunk record codec.
//!
//! ```text
//! u32  plaintext_size
//! u8   nonce[nonce_size]        ; 12 for both content suites
//! u8   ciphertext[plaintext_size]
//! u8   tag[16]
//! ```

use std::io::{Read, Write};

use shroud_core::{Error, Result};

/// Authentication tag length appended to every chunk ciphertext.
pub const CHUNK_TAG_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecordHeader {
    pub plaintext_size: u32,
    pub nonce: Vec<u8>,
}

impl ChunkRecordHeader {
    pub fn new(plaintext_size: u32, nonce: Vec<u8>) -> Self {
        Self {
            plaintext_size,
            nonce,
        }
    }

    pub fn encoded_len(&self) -> u64 {
        (4 + self.nonce.len()) as u64
    }

    /// Bytes of ciphertext (including tag) following this header on disk.
    pub fn ciphertext_len(&self) -> usize {
        self.plaintext_size as usize + CHUNK_TAG_SIZE
    }

    /// Full record size: header + ciphertext + tag.
    pub fn record_len(&self) -> u64 {
        self.encoded_len() + self.ciphertext_len() as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(&self.plaintext_size.to_le_bytes());
        buf.extend_from_slice(&self.nonce);
        w.write_all(&buf)
            .map_err(|e| Error::io("write chunk record", std::path::Path::new(""), e))
    }

    pub fn read_from<R: Read>(r: &mut R, nonce_size: usize) -> Result<Self> {
        let mut size_bytes = [0u8; 4];
        r.read_exact(&mut size_bytes)
            .map_err(|e| Error::io("read chunk record", std::path::Path::new(""), e))?;
        let mut nonce = vec![0u8; nonce_size];
        r.read_exact(&mut nonce)
            .map_err(|e| Error::io("read chunk record", std::path::Path::new(""), e))?;
        Ok(Self {
            plaintext_size: u32::from_le_bytes(size_bytes),
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let header = ChunkRecordHeader::new(4096, vec![0x11; 12]);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, header.encoded_len());

        let parsed = ChunkRecordHeader::read_from(&mut Cursor::new(&buf), 12).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn sizes_add_up() {
        let header = ChunkRecordHeader::new(100, vec![0; 12]);
        assert_eq!(header.encoded_len(), 16);
        assert_eq!(header.ciphertext_len(), 116);
        assert_eq!(header.record_len(), 132);
    }

    #[test]
    fn truncated_record_is_io_error() {
        let header = ChunkRecordHeader::new(64, vec![0x22; 12]);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf.truncate(7);
        assert!(ChunkRecordHeader::read_from(&mut Cursor::new(&buf), 12).is_err());
    }
}
