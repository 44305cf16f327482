//! The chunk engine: random-access plaintext I/O over an encrypted backing
//! file.
//!
//! One chunk is resident as the "current" buffer at any time. Loading a
//! different chunk flushes the current one if dirty, then consults the LRU
//! cache before touching disk. Non-terminal chunks are always exactly
//! `chunk_size` bytes of plaintext, so in-place rewrites never move data and
//! a plaintext position maps to a chunk by plain division.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use shroud_core::{CipherSuite, Error, ParallelConfig, Result};
use shroud_crypto::{generate_nonce, ContentCipher, KeyProvider, NONCE_SIZE, TAG_SIZE};
use shroud_format::index::validate_chunk_size;
use shroud_format::{ChunkIndex, ChunkRecordHeader, FileHeader};

use crate::cache::ChunkCache;
use crate::parallel::{decrypt_batch, encrypt_batch, ChunkJob};
use crate::vfs::VfsFile;

/// Decrypted chunks kept around per open file.
const CACHE_CAPACITY: usize = 16;

struct CurrentChunk {
    index: u32,
    buf: Vec<u8>,
    dirty: bool,
}

pub struct ChunkedFile {
    file: Box<dyn VfsFile>,
    path: PathBuf,
    header: FileHeader,
    index: ChunkIndex,
    cipher: Option<ContentCipher>,
    chunk_size: u32,
    parallel: ParallelConfig,
    position: u64,
    current: Option<CurrentChunk>,
    cache: ChunkCache,
    /// Header or index changed since the last sync.
    file_dirty: bool,
    closed: bool,
}

impl ChunkedFile {
    /// Open or initialize a chunked file over `file`.
    ///
    /// An empty backing file is initialized with a fresh salt, an empty
    /// (fully reserved) index, and the resolved cipher. A non-empty file is
    /// loaded and its key resolved by trying the provider's candidate keys
    /// until one authenticates chunk 0.
    pub fn open(
        mut file: Box<dyn VfsFile>,
        path: &Path,
        provider: &dyn KeyProvider,
        suite: CipherSuite,
        chunk_size: u32,
        parallel: ParallelConfig,
    ) -> Result<Self> {
        validate_chunk_size(chunk_size)?;

        let len = file
            .byte_len()
            .map_err(|e| Error::io("stat", path, e))?;

        if len == 0 {
            let salt = provider.generate_salt()?;
            let key = provider.derive_key(&salt)?;
            let cipher = ContentCipher::new(suite, &key)?;
            let header = FileHeader::new(suite.resolve(), salt, generate_nonce().to_vec());
            let index = ChunkIndex::new(chunk_size);

            let mut this = Self {
                file,
                path: path.to_owned(),
                header,
                index,
                cipher: Some(cipher),
                chunk_size,
                parallel,
                position: 0,
                current: None,
                cache: ChunkCache::new(CACHE_CAPACITY),
                file_dirty: false,
                closed: false,
            };
            this.write_headers()?;
            debug!(path = %this.path.display(), chunk_size, "initialized chunked file");
            return Ok(this);
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("seek", path, e))?;
        let header = FileHeader::read_from(&mut file)?;
        let index = ChunkIndex::read_from(&mut file)?;
        validate_chunk_size(index.chunk_size())?;

        let mut this = Self {
            file,
            path: path.to_owned(),
            chunk_size: index.chunk_size(),
            header,
            index,
            cipher: None,
            parallel,
            position: 0,
            current: None,
            cache: ChunkCache::new(CACHE_CAPACITY),
            file_dirty: false,
            closed: false,
        };
        this.resolve_key(provider)?;
        debug!(
            path = %this.path.display(),
            chunks = this.index.chunk_count(),
            "opened chunked file"
        );
        Ok(this)
    }

    /// Try each candidate key until one authenticates the file.
    ///
    /// The probe decrypts chunk 0; an empty file accepts the primary key
    /// since there is nothing to authenticate against yet. Only the final
    /// candidate's failure surfaces.
    fn resolve_key(&mut self, provider: &dyn KeyProvider) -> Result<()> {
        let suite = self.header.cipher;
        let candidates = provider.candidate_keys(&self.header.salt)?;
        let total = candidates.len();

        if self.index.chunk_count() == 0 {
            let key = candidates
                .into_iter()
                .next()
                .ok_or(Error::Auth)?;
            self.cipher = Some(ContentCipher::new(suite, &key)?);
            return Ok(());
        }

        let mut last_err = Error::Auth;
        for key in candidates {
            let cipher = ContentCipher::new(suite, &key)?;
            self.cipher = Some(cipher);
            match self.read_chunk(0) {
                Ok(_) => return Ok(()),
                Err(e @ (Error::Auth | Error::Corruption { .. })) => last_err = e,
                Err(e) => return Err(e),
            }
        }
        self.cipher = None;
        if total > 1 {
            debug!(path = %self.path.display(), "all candidate keys failed authentication");
        }
        Err(last_err)
    }

    fn cipher(&self) -> Result<&ContentCipher> {
        self.cipher.as_ref().ok_or(Error::Closed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Virtual plaintext size, including unflushed growth in the current
    /// buffer.
    pub fn len(&self) -> u64 {
        let base = self.index.total_plaintext_size();
        match &self.current {
            Some(cur) => {
                base.max(cur.index as u64 * self.chunk_size as u64 + cur.buf.len() as u64)
            }
            None => base,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    // ── Read ──────────────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes at the current position. `Ok(0)` at EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut total = 0usize;
        while total < buf.len() {
            if self.position >= self.len() {
                break;
            }

            let chunk_idx = (self.position / self.chunk_size as u64) as u32;
            let off_in_chunk = (self.position % self.chunk_size as u64) as usize;
            self.ensure_loaded(chunk_idx)?;
            let Some(cur) = self.current.as_ref() else {
                return Err(Error::corruption("chunk buffer missing after load"));
            };

            let available = cur.buf.len().saturating_sub(off_in_chunk);
            if available == 0 {
                break;
            }
            let n = available.min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&cur.buf[off_in_chunk..off_in_chunk + n]);
            total += n;
            self.position += n as u64;
        }
        Ok(total)
    }

    /// Read the whole remaining plaintext.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    // ── Write ─────────────────────────────────────────────────────────────

    /// Write `data` at the current position, creating or extending chunks as
    /// needed. A position beyond EOF zero-extends the file first.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        if self.position > self.len() {
            let target = self.position;
            self.zero_extend(target)?;
        }
        self.write_contiguous(data)
    }

    /// Write assuming `position <= len()`, so chunks are never skipped.
    fn write_contiguous(&mut self, data: &[u8]) -> Result<usize> {
        let chunk_size = self.chunk_size as usize;
        let mut total = 0usize;

        while total < data.len() {
            let chunk_idx = (self.position / self.chunk_size as u64) as u32;
            let off_in_chunk = (self.position % self.chunk_size as u64) as usize;
            self.ensure_loaded(chunk_idx)?;
            let Some(cur) = self.current.as_mut() else {
                return Err(Error::corruption("chunk buffer missing after load"));
            };

            let n = (chunk_size - off_in_chunk).min(data.len() - total);
            if off_in_chunk + n > cur.buf.len() {
                cur.buf.resize(off_in_chunk + n, 0);
            }
            cur.buf[off_in_chunk..off_in_chunk + n].copy_from_slice(&data[total..total + n]);
            cur.dirty = true;
            self.file_dirty = true;
            total += n;
            self.position += n as u64;
        }
        Ok(total)
    }

    /// Zero-fill from the current end of file up to `target`.
    fn zero_extend(&mut self, target: u64) -> Result<()> {
        let saved = self.position;
        let mut logical = self.len();
        let zeros = vec![0u8; (64 * 1024).min((target - logical) as usize)];
        while logical < target {
            self.position = logical;
            let n = ((target - logical) as usize).min(zeros.len());
            let written = self.write_contiguous(&zeros[..n])?;
            logical += written as u64;
        }
        self.position = saved;
        Ok(())
    }

    /// Positional read: like `read` at `offset`, leaving the cursor alone.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        let saved = self.position;
        self.position = offset;
        let result = self.read(buf);
        self.position = saved;
        result
    }

    /// Positional write: like `write` at `offset`, leaving the cursor alone.
    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        let saved = self.position;
        self.position = offset;
        let result = self.write(data);
        self.position = saved;
        result
    }

    // ── Seek ──────────────────────────────────────────────────────────────

    /// Move the plaintext position. Never touches chunk buffers.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let len = self.len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(Error::InvalidOffset {
                offset: target,
                size: len as u64,
            });
        }
        self.position = target as u64;
        Ok(self.position)
    }

    // ── Chunk residency ───────────────────────────────────────────────────

    /// Make `chunk_idx` the current chunk, flushing the previous one if it
    /// was modified. A chunk just past the end of the index becomes a fresh
    /// empty buffer with no on-disk presence yet.
    fn ensure_loaded(&mut self, chunk_idx: u32) -> Result<()> {
        if matches!(&self.current, Some(cur) if cur.index == chunk_idx) {
            return Ok(());
        }

        self.flush_current()?;

        if chunk_idx >= self.index.chunk_count() {
            if chunk_idx > self.index.chunk_count() {
                return Err(Error::corruption(format!(
                    "chunk {chunk_idx} would leave a hole after chunk {}",
                    self.index.chunk_count()
                )));
            }
            self.current = Some(CurrentChunk {
                index: chunk_idx,
                buf: Vec::with_capacity(self.chunk_size as usize),
                dirty: false,
            });
            return Ok(());
        }

        if let Some(data) = self.cache.get(chunk_idx) {
            self.current = Some(CurrentChunk {
                index: chunk_idx,
                buf: data,
                dirty: false,
            });
            return Ok(());
        }

        let data = self.read_chunk(chunk_idx)?;
        self.cache.insert(chunk_idx, &data);
        self.current = Some(CurrentChunk {
            index: chunk_idx,
            buf: data,
            dirty: false,
        });
        Ok(())
    }

    /// Read and decrypt one chunk from disk.
    fn read_chunk(&mut self, chunk_idx: u32) -> Result<Vec<u8>> {
        let (offset, plaintext_size) = self.index.chunk_info(chunk_idx)?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seek", &self.path, e))?;

        let record = ChunkRecordHeader::read_from(&mut self.file, NONCE_SIZE)?;
        if record.plaintext_size != plaintext_size {
            return Err(Error::corruption(format!(
                "chunk {chunk_idx}: record claims {} plaintext bytes, index says {}",
                record.plaintext_size, plaintext_size
            )));
        }

        let mut ciphertext = vec![0u8; plaintext_size as usize + TAG_SIZE];
        self.file
            .read_exact(&mut ciphertext)
            .map_err(|e| Error::io("read chunk", &self.path, e))?;

        self.cipher()?.decrypt(&record.nonce, &ciphertext)
    }

    /// Encrypt `plaintext` under a fresh nonce and write it as chunk
    /// `chunk_idx`: in place for an existing chunk, appended otherwise. The
    /// index entry and cache are refreshed.
    fn write_chunk_record(&mut self, chunk_idx: u32, plaintext: &[u8]) -> Result<()> {
        let nonce = generate_nonce();
        let ciphertext = self.cipher()?.encrypt(&nonce, plaintext)?;

        let existing = chunk_idx < self.index.chunk_count();
        let offset = if existing {
            self.index.chunk_info(chunk_idx)?.0
        } else {
            self.file
                .seek(SeekFrom::End(0))
                .map_err(|e| Error::io("seek", &self.path, e))?
        };

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("seek", &self.path, e))?;
        let record = ChunkRecordHeader::new(plaintext.len() as u32, nonce.to_vec());
        record.write_to(&mut self.file)?;
        self.file
            .write_all(&ciphertext)
            .map_err(|e| Error::io("write chunk", &self.path, e))?;

        if existing {
            self.index.set_plaintext_size(chunk_idx, plaintext.len() as u32)?;
        } else {
            self.index.push_chunk(offset, plaintext.len() as u32)?;
        }
        self.cache.insert(chunk_idx, plaintext);
        self.file_dirty = true;
        Ok(())
    }

    /// Flush the current chunk if modified. On failure the chunk stays
    /// dirty so nothing is silently lost.
    fn flush_current(&mut self) -> Result<()> {
        let Some(mut cur) = self.current.take() else {
            return Ok(());
        };
        if !cur.dirty {
            self.current = Some(cur);
            return Ok(());
        }
        match self.write_chunk_record(cur.index, &cur.buf) {
            Ok(()) => {
                cur.dirty = false;
                self.current = Some(cur);
                Ok(())
            }
            Err(e) => {
                self.current = Some(cur);
                Err(e)
            }
        }
    }

    fn write_headers(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("seek", &self.path, e))?;
        self.header.write_to(&mut self.file)?;
        self.index.write_to(&mut self.file)?;
        Ok(())
    }

    /// Physical offset where chunk data starts.
    fn data_start(&self) -> u64 {
        self.header.encoded_len() + self.index.encoded_len()
    }

    // ── Sync / close ──────────────────────────────────────────────────────

    /// Flush the current chunk and, if anything changed, rewrite the header
    /// and index in place, then sync the backing store.
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_current()?;
        if self.file_dirty {
            self.write_headers()?;
            self.file_dirty = false;
        }
        self.file
            .sync_all()
            .map_err(|e| Error::io("sync", &self.path, e))
    }

    /// Sync and invalidate the handle. Every later operation fails with
    /// `Closed`.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.sync()?;
        self.closed = true;
        self.cipher = None;
        self.current = None;
        self.cache.clear();
        Ok(())
    }

    // ── Truncate ──────────────────────────────────────────────────────────

    /// Change the file size. Shrinking drops whole chunks and rewrites the
    /// final retained one; growing zero-extends.
    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.ensure_open()?;
        let logical = self.len();
        if new_size == logical {
            return Ok(());
        }
        if new_size > logical {
            return self.zero_extend(new_size);
        }

        // Shrink. Flush first so the index covers every byte.
        self.flush_current()?;
        self.current = None;

        if new_size == 0 {
            self.index.truncate_chunks(0);
            self.cache.clear();
            let end = self.data_start();
            self.file
                .set_len(end)
                .map_err(|e| Error::io("truncate", &self.path, e))?;
            self.file_dirty = true;
            debug!(path = %self.path.display(), "truncated to empty");
            return Ok(());
        }

        let (last_idx, off_in_last) = self.index.find_chunk_for_offset(new_size - 1)?;
        let keep = off_in_last as usize + 1;

        let mut tail = self.read_chunk(last_idx)?;
        tail.truncate(keep);

        self.index.truncate_chunks(last_idx + 1);
        self.cache.clear();
        // Ciphertext length changed, so the record must be rewritten.
        self.write_chunk_record(last_idx, &tail)?;

        let (offset, _) = self.index.chunk_info(last_idx)?;
        let record = ChunkRecordHeader::new(keep as u32, vec![0u8; NONCE_SIZE]);
        let end = offset + record.record_len();
        self.file
            .set_len(end)
            .map_err(|e| Error::io("truncate", &self.path, e))?;
        self.file_dirty = true;
        debug!(path = %self.path.display(), new_size, "truncated");
        Ok(())
    }

    // ── Bulk I/O ──────────────────────────────────────────────────────────

    /// Read with parallel chunk decryption when the request spans enough
    /// chunks; otherwise equivalent to [`read`](Self::read).
    pub fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.parallel.enabled {
            return self.read(buf);
        }

        // Make the on-disk state authoritative before gathering.
        self.flush_current()?;

        let total_size = self.index.total_plaintext_size();
        if self.position >= total_size {
            return Ok(0);
        }

        let end = (self.position + buf.len() as u64).min(total_size);
        let (start_idx, off_in_start) = self.index.find_chunk_for_offset(self.position)?;
        let (last_idx, _) = self.index.find_chunk_for_offset(end - 1)?;
        let span = (last_idx - start_idx + 1) as usize;

        if span < self.parallel.min_chunks_for_parallel {
            return self.read(buf);
        }

        // Gather ciphertexts sequentially.
        let mut jobs = Vec::with_capacity(span);
        for chunk_idx in start_idx..=last_idx {
            let (offset, plaintext_size) = self.index.chunk_info(chunk_idx)?;
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io("seek", &self.path, e))?;
            let record = ChunkRecordHeader::read_from(&mut self.file, NONCE_SIZE)?;
            if record.plaintext_size != plaintext_size {
                return Err(Error::corruption(format!(
                    "chunk {chunk_idx}: record claims {} plaintext bytes, index says {}",
                    record.plaintext_size, plaintext_size
                )));
            }
            let mut ciphertext = vec![0u8; plaintext_size as usize + TAG_SIZE];
            self.file
                .read_exact(&mut ciphertext)
                .map_err(|e| Error::io("read chunk", &self.path, e))?;

            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&record.nonce);
            jobs.push(ChunkJob::for_decrypt(chunk_idx, nonce, ciphertext));
        }

        decrypt_batch(self.cipher()?, &mut jobs, &self.parallel)?;

        // Assemble in chunk order.
        let mut total = 0usize;
        for (i, job) in jobs.iter().enumerate() {
            let skip = if i == 0 { off_in_start as usize } else { 0 };
            if skip >= job.plaintext.len() {
                continue;
            }
            let n = (job.plaintext.len() - skip).min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&job.plaintext[skip..skip + n]);
            total += n;
            if total == buf.len() {
                break;
            }
        }
        self.position += total as u64;
        Ok(total)
    }

    /// Write with parallel chunk encryption when the request spans enough
    /// chunks; otherwise equivalent to [`write`](Self::write).
    ///
    /// Partial head and tail chunks are merged with their existing contents
    /// so interior overwrites never lose bytes.
    pub fn write_bulk(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        if !self.parallel.enabled {
            return self.write(data);
        }
        if self.position > self.len() {
            let target = self.position;
            self.zero_extend(target)?;
        }

        let chunk_size = self.chunk_size as u64;
        let start_idx = (self.position / chunk_size) as u32;
        let end_pos = self.position + data.len() as u64;
        let end_idx_exclusive = end_pos.div_ceil(chunk_size) as u32;
        let span = (end_idx_exclusive - start_idx) as usize;

        if span < self.parallel.min_chunks_for_parallel {
            return self.write(data);
        }

        // The affected chunks are about to be rewritten wholesale; the
        // current buffer must not survive with stale contents.
        self.flush_current()?;
        self.current = None;

        let count = self.index.chunk_count();
        let mut jobs = Vec::with_capacity(span);
        let mut consumed = 0usize;

        for chunk_idx in start_idx..end_idx_exclusive {
            let chunk_start = chunk_idx as u64 * chunk_size;
            let write_start = (self.position.max(chunk_start) - chunk_start) as usize;
            let write_end = (end_pos.min(chunk_start + chunk_size) - chunk_start) as usize;
            let n = write_end - write_start;

            let existing_len = if chunk_idx < count {
                self.index.chunk_info(chunk_idx)?.1 as usize
            } else {
                0
            };

            // Merge with existing bytes when the overwrite is partial.
            let mut chunk_buf = if (write_start > 0 || write_end < existing_len)
                && chunk_idx < count
            {
                self.chunk_plaintext(chunk_idx)?
            } else {
                Vec::new()
            };
            let needed = existing_len.max(write_end);
            if chunk_buf.len() < needed {
                chunk_buf.resize(needed, 0);
            }
            chunk_buf[write_start..write_end]
                .copy_from_slice(&data[consumed..consumed + n]);

            jobs.push(ChunkJob::for_encrypt(chunk_idx, generate_nonce(), chunk_buf));
            consumed += n;
        }

        encrypt_batch(self.cipher()?, &mut jobs, &self.parallel)?;

        // Land the records in chunk order so appends stay contiguous.
        for job in &jobs {
            let existing = job.index < self.index.chunk_count();
            let offset = if existing {
                self.index.chunk_info(job.index)?.0
            } else {
                self.file
                    .seek(SeekFrom::End(0))
                    .map_err(|e| Error::io("seek", &self.path, e))?
            };
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io("seek", &self.path, e))?;
            let record = ChunkRecordHeader::new(job.plaintext.len() as u32, job.nonce.to_vec());
            record.write_to(&mut self.file)?;
            self.file
                .write_all(&job.ciphertext)
                .map_err(|e| Error::io("write chunk", &self.path, e))?;

            if existing {
                self.index
                    .set_plaintext_size(job.index, job.plaintext.len() as u32)?;
            } else {
                self.index.push_chunk(offset, job.plaintext.len() as u32)?;
            }
            self.cache.insert(job.index, &job.plaintext);
        }

        self.position = end_pos;
        self.file_dirty = true;
        Ok(data.len())
    }

    /// Plaintext of a chunk, via the cache when possible.
    fn chunk_plaintext(&mut self, chunk_idx: u32) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.get(chunk_idx) {
            return Ok(data);
        }
        self.read_chunk(chunk_idx)
    }
}

impl Drop for ChunkedFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
