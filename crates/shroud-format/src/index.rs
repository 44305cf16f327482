//! Chunk index codec: the fixed 20 KiB table after the file header.
//!
//! ```text
//! u32  chunk_size
//! u32  chunk_count
//! u64  offsets[chunk_count]          ; byte offset into the backing file
//! u32  plaintext_sizes[chunk_count]
//! u8   pad[...] = 0                  ; zero padding to exactly 20 KiB
//! ```
//! Writing always emits the whole reserved region so the first chunk's
//! physical offset never moves as the index grows.

use std::io::{Read, Write};

use shroud_core::{Error, Result};

use crate::{CHUNK_INDEX_RESERVED, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Fixed bytes before the per-chunk arrays: chunk_size + chunk_count.
const INDEX_FIXED: usize = 8;

/// Bytes per chunk entry: u64 offset + u32 plaintext size.
const ENTRY_SIZE: usize = 12;

/// Largest chunk count the reserved region can hold.
pub const MAX_CHUNK_COUNT: usize = (CHUNK_INDEX_RESERVED - INDEX_FIXED) / ENTRY_SIZE;

/// Validate a chunk size against the engine-level bounds.
pub fn validate_chunk_size(size: u32) -> Result<()> {
    if size < MIN_CHUNK_SIZE {
        return Err(Error::validation(
            "chunk_size",
            format!("{size} below the engine minimum of {MIN_CHUNK_SIZE}"),
        ));
    }
    if size > MAX_CHUNK_SIZE {
        return Err(Error::validation(
            "chunk_size",
            format!("{size} above the maximum of {MAX_CHUNK_SIZE}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    chunk_size: u32,
    offsets: Vec<u64>,
    plaintext_sizes: Vec<u32>,
}

impl ChunkIndex {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size,
            offsets: Vec::new(),
            plaintext_sizes: Vec::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    /// On-disk size of the index region; constant by design.
    pub fn encoded_len(&self) -> u64 {
        CHUNK_INDEX_RESERVED as u64
    }

    /// Append a chunk entry. Fails once the reserved region is exhausted.
    pub fn push_chunk(&mut self, offset: u64, plaintext_size: u32) -> Result<()> {
        if self.offsets.len() >= MAX_CHUNK_COUNT {
            return Err(Error::validation(
                "chunk_count",
                format!("index region full: at most {MAX_CHUNK_COUNT} chunks per file"),
            ));
        }
        self.offsets.push(offset);
        self.plaintext_sizes.push(plaintext_size);
        Ok(())
    }

    /// Backing offset and plaintext size of one chunk.
    pub fn chunk_info(&self, idx: u32) -> Result<(u64, u32)> {
        let i = idx as usize;
        if i >= self.offsets.len() {
            return Err(Error::validation(
                "chunk_index",
                format!("chunk {idx} out of range (count {})", self.offsets.len()),
            ));
        }
        Ok((self.offsets[i], self.plaintext_sizes[i]))
    }

    pub fn set_plaintext_size(&mut self, idx: u32, size: u32) -> Result<()> {
        let i = idx as usize;
        if i >= self.plaintext_sizes.len() {
            return Err(Error::validation(
                "chunk_index",
                format!("chunk {idx} out of range (count {})", self.plaintext_sizes.len()),
            ));
        }
        self.plaintext_sizes[i] = size;
        Ok(())
    }

    /// Drop every chunk from `new_count` onward (truncation support).
    pub fn truncate_chunks(&mut self, new_count: u32) {
        self.offsets.truncate(new_count as usize);
        self.plaintext_sizes.truncate(new_count as usize);
    }

    /// Sum of all plaintext sizes: the virtual file size.
    pub fn total_plaintext_size(&self) -> u64 {
        self.plaintext_sizes.iter().map(|&s| s as u64).sum()
    }

    /// Map a plaintext offset to `(chunk, offset_within_chunk)`.
    ///
    /// An offset exactly at EOF returns `(chunk_count, 0)`, the append
    /// position. Anything strictly beyond EOF is an error.
    pub fn find_chunk_for_offset(&self, offset: u64) -> Result<(u32, u64)> {
        let mut start = 0u64;
        for (i, &size) in self.plaintext_sizes.iter().enumerate() {
            let end = start + size as u64;
            if offset < end {
                return Ok((i as u32, offset - start));
            }
            start = end;
        }
        if offset == start {
            return Ok((self.chunk_count(), 0));
        }
        Err(Error::InvalidOffset {
            offset: offset as i64,
            size: start,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let entries = self.offsets.len();
        let actual = INDEX_FIXED + entries * ENTRY_SIZE;
        if actual > CHUNK_INDEX_RESERVED {
            return Err(Error::validation(
                "chunk_count",
                format!("{entries} entries overflow the reserved index region"),
            ));
        }

        let mut buf = vec![0u8; CHUNK_INDEX_RESERVED];
        buf[0..4].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf[4..8].copy_from_slice(&(entries as u32).to_le_bytes());
        let mut at = INDEX_FIXED;
        for &offset in &self.offsets {
            buf[at..at + 8].copy_from_slice(&offset.to_le_bytes());
            at += 8;
        }
        for &size in &self.plaintext_sizes {
            buf[at..at + 4].copy_from_slice(&size.to_le_bytes());
            at += 4;
        }

        w.write_all(&buf)
            .map_err(|e| Error::io("write chunk index", std::path::Path::new(""), e))
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = vec![0u8; CHUNK_INDEX_RESERVED];
        r.read_exact(&mut buf)
            .map_err(|e| Error::io("read chunk index", std::path::Path::new(""), e))?;

        let chunk_size = le_u32(&buf, 0);
        let count = le_u32(&buf, 4) as usize;
        if count > MAX_CHUNK_COUNT {
            return Err(Error::corruption(format!(
                "chunk index claims {count} chunks, more than the region can hold"
            )));
        }

        let mut offsets = Vec::with_capacity(count);
        let mut plaintext_sizes = Vec::with_capacity(count);
        let mut at = INDEX_FIXED;
        for _ in 0..count {
            offsets.push(le_u64(&buf, at));
            at += 8;
        }
        for _ in 0..count {
            plaintext_sizes.push(le_u32(&buf, at));
            at += 4;
        }

        Ok(Self {
            chunk_size,
            offsets,
            plaintext_sizes,
        })
    }
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn empty_index_roundtrip_is_reserved_size() {
        let index = ChunkIndex::new(4096);
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CHUNK_INDEX_RESERVED);

        let parsed = ChunkIndex::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, index);
        assert_eq!(parsed.chunk_count(), 0);
        assert_eq!(parsed.total_plaintext_size(), 0);
    }

    #[test]
    fn populated_roundtrip() {
        let mut index = ChunkIndex::new(100);
        index.push_chunk(20500, 100).unwrap();
        index.push_chunk(20632, 100).unwrap();
        index.push_chunk(20764, 50).unwrap();

        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CHUNK_INDEX_RESERVED);

        let parsed = ChunkIndex::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, index);
        assert_eq!(parsed.total_plaintext_size(), 250);
        assert_eq!(parsed.chunk_info(2).unwrap(), (20764, 50));
    }

    #[test]
    fn find_chunk_walks_cumulative_sizes() {
        let mut index = ChunkIndex::new(100);
        index.push_chunk(0, 100).unwrap();
        index.push_chunk(0, 100).unwrap();
        index.push_chunk(0, 50).unwrap();

        assert_eq!(index.find_chunk_for_offset(0).unwrap(), (0, 0));
        assert_eq!(index.find_chunk_for_offset(99).unwrap(), (0, 99));
        assert_eq!(index.find_chunk_for_offset(100).unwrap(), (1, 0));
        assert_eq!(index.find_chunk_for_offset(150).unwrap(), (1, 50));
        assert_eq!(index.find_chunk_for_offset(249).unwrap(), (2, 49));
        // exactly EOF: the append sentinel
        assert_eq!(index.find_chunk_for_offset(250).unwrap(), (3, 0));
        assert!(matches!(
            index.find_chunk_for_offset(251),
            Err(Error::InvalidOffset { offset: 251, size: 250 })
        ));
    }

    #[test]
    fn empty_index_eof_sentinel() {
        let index = ChunkIndex::new(100);
        assert_eq!(index.find_chunk_for_offset(0).unwrap(), (0, 0));
        assert!(index.find_chunk_for_offset(1).is_err());
    }

    #[test]
    fn out_of_range_chunk_info() {
        let index = ChunkIndex::new(100);
        assert!(index.chunk_info(0).is_err());
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let mut index = ChunkIndex::new(64);
        for i in 0..MAX_CHUNK_COUNT {
            index.push_chunk(i as u64, 64).unwrap();
        }
        assert!(index.push_chunk(0, 64).is_err());

        // A full index still encodes to exactly the reserved size.
        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CHUNK_INDEX_RESERVED);
        let parsed = ChunkIndex::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.chunk_count() as usize, MAX_CHUNK_COUNT);
    }

    #[test]
    fn absurd_count_is_corruption() {
        let mut buf = vec![0u8; CHUNK_INDEX_RESERVED];
        buf[0..4].copy_from_slice(&4096u32.to_le_bytes());
        buf[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            ChunkIndex::read_from(&mut Cursor::new(&buf)),
            Err(Error::Corruption { .. })
        ));
    }

    #[test]
    fn truncate_chunks_drops_tail() {
        let mut index = ChunkIndex::new(100);
        index.push_chunk(10, 100).unwrap();
        index.push_chunk(20, 100).unwrap();
        index.push_chunk(30, 40).unwrap();
        index.truncate_chunks(1);
        assert_eq!(index.chunk_count(), 1);
        assert_eq!(index.total_plaintext_size(), 100);
    }

    #[test]
    fn chunk_size_bounds() {
        assert!(validate_chunk_size(63).is_err());
        validate_chunk_size(64).unwrap();
        validate_chunk_size(MAX_CHUNK_SIZE).unwrap();
        assert!(validate_chunk_size(MAX_CHUNK_SIZE + 1).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_layouts(
            chunk_size in 64u32..=65536,
            entries in proptest::collection::vec((0u64..(1u64 << 40), 1u32..=65536), 0..300),
        ) {
            let mut index = ChunkIndex::new(chunk_size);
            for &(offset, size) in &entries {
                index.push_chunk(offset, size).unwrap();
            }
            let mut buf = Vec::new();
            index.write_to(&mut buf).unwrap();
            prop_assert_eq!(buf.len(), CHUNK_INDEX_RESERVED);
            let parsed = ChunkIndex::read_from(&mut Cursor::new(&buf)).unwrap();
            prop_assert_eq!(parsed, index);
        }

        #[test]
        fn find_chunk_inverts_layout(sizes in proptest::collection::vec(1u32..=512, 1..40)) {
            let mut index = ChunkIndex::new(512);
            for &s in &sizes {
                index.push_chunk(0, s).unwrap();
            }
            let total = index.total_plaintext_size();
            // Walk every boundary and a point inside each chunk.
            let mut start = 0u64;
            for (i, &s) in sizes.iter().enumerate() {
                prop_assert_eq!(index.find_chunk_for_offset(start).unwrap(), (i as u32, 0));
                prop_assert_eq!(
                    index.find_chunk_for_offset(start + s as u64 - 1).unwrap(),
                    (i as u32, s as u64 - 1)
                );
                start += s as u64;
            }
            prop_assert_eq!(index.find_chunk_for_offset(total).unwrap(), (sizes.len() as u32, 0));
            prop_assert!(index.find_chunk_for_offset(total + 1).is_err());
        }
    }
}
