//! The public file handle.
//!
//! Wraps either file strategy behind one mutex: every operation holds the
//! lock for its full duration, so reads and writes on a shared handle never
//! interleave and each operation sees all earlier effects. Coordination of
//! multiple handles to the same underlying file is the caller's problem.

use std::io::{self, SeekFrom};
use std::sync::Mutex;

use shroud_core::Result;

use crate::blob::BlobFile;
use crate::chunked::ChunkedFile;

pub(crate) enum FileInner {
    Chunked(ChunkedFile),
    Blob(BlobFile),
}

/// An open encrypted file presenting plaintext byte semantics.
pub struct EncryptedFile {
    inner: Mutex<FileInner>,
}

impl EncryptedFile {
    pub(crate) fn new(inner: FileInner) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut FileInner) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().expect("file lock poisoned");
        f(&mut guard)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.read(buf),
            FileInner::Blob(f) => f.read(buf),
        })
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.write(data),
            FileInner::Blob(f) => f.write(data),
        })
    }

    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.seek(pos),
            FileInner::Blob(f) => f.seek(pos),
        })
    }

    /// Positional read; the cursor is untouched.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.read_at(buf, offset),
            FileInner::Blob(f) => f.read_at(buf, offset),
        })
    }

    /// Positional write; the cursor is untouched.
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.write_at(data, offset),
            FileInner::Blob(f) => f.write_at(data, offset),
        })
    }

    /// Bulk read: decrypts spans of chunks on the worker pool when
    /// worthwhile. Identical semantics to `read`.
    pub fn read_bulk(&self, buf: &mut [u8]) -> Result<usize> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.read_bulk(buf),
            FileInner::Blob(f) => f.read(buf),
        })
    }

    /// Bulk write counterpart of [`read_bulk`](Self::read_bulk).
    pub fn write_bulk(&self, data: &[u8]) -> Result<usize> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.write_bulk(data),
            FileInner::Blob(f) => f.write(data),
        })
    }

    pub fn truncate(&self, new_size: u64) -> Result<()> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.truncate(new_size),
            FileInner::Blob(f) => f.truncate(new_size),
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.sync(),
            FileInner::Blob(f) => f.sync(),
        })
    }

    pub fn close(&self) -> Result<()> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => f.close(),
            FileInner::Blob(f) => f.close(),
        })
    }

    /// Current plaintext length.
    pub fn len(&self) -> Result<u64> {
        self.with(|inner| match inner {
            FileInner::Chunked(f) => Ok(f.len()),
            FileInner::Blob(f) => Ok(f.len()),
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read everything from the current position.
    pub fn read_to_end(&self, out: &mut Vec<u8>) -> Result<usize> {
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
}

impl io::Read for EncryptedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        EncryptedFile::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for EncryptedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        EncryptedFile::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl io::Seek for EncryptedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        EncryptedFile::seek(self, pos).map_err(io::Error::from)
    }
}
