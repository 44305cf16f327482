//! Single-record strategy (`chunk_size == 0`): the whole plaintext lives in
//! one AEAD record right after the header, keyed by the header's trailing
//! nonce. The plaintext is buffered in memory and rewritten wholesale, with
//! a fresh nonce, on every flush. Suited to small files; large or
//! seek-heavy workloads belong on the chunk engine.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use shroud_core::{CipherSuite, Error, Result};
use shroud_crypto::{generate_nonce, ContentCipher, KeyProvider};
use shroud_format::FileHeader;

use crate::vfs::VfsFile;

pub struct BlobFile {
    file: Box<dyn VfsFile>,
    path: PathBuf,
    header: FileHeader,
    cipher: Option<ContentCipher>,
    plaintext: Vec<u8>,
    position: u64,
    dirty: bool,
    closed: bool,
}

impl BlobFile {
    pub fn open(
        mut file: Box<dyn VfsFile>,
        path: &Path,
        provider: &dyn KeyProvider,
        suite: CipherSuite,
    ) -> Result<Self> {
        let len = file
            .byte_len()
            .map_err(|e| Error::io("stat", path, e))?;

        if len == 0 {
            let salt = provider.generate_salt()?;
            let key = provider.derive_key(&salt)?;
            let cipher = ContentCipher::new(suite, &key)?;
            let header = FileHeader::new(suite.resolve(), salt, generate_nonce().to_vec());
            debug!(path = %path.display(), "initialized single-record file");
            return Ok(Self {
                file,
                path: path.to_owned(),
                header,
                cipher: Some(cipher),
                plaintext: Vec::new(),
                position: 0,
                // The header has not been persisted yet.
                dirty: true,
                closed: false,
            });
        }

        file.seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("seek", path, e))?;
        let header = FileHeader::read_from(&mut file)?;

        let mut ciphertext = Vec::new();
        file.read_to_end(&mut ciphertext)
            .map_err(|e| Error::io("read", path, e))?;

        // Try candidate keys in provider order; only the last failure counts.
        let mut resolved = None;
        let mut last_err = Error::Auth;
        for key in provider.candidate_keys(&header.salt)? {
            let cipher = ContentCipher::new(header.cipher, &key)?;
            match cipher.decrypt(&header.nonce, &ciphertext) {
                Ok(plaintext) => {
                    resolved = Some((cipher, plaintext));
                    break;
                }
                Err(e @ Error::Auth) => last_err = e,
                Err(e) => return Err(e),
            }
        }
        let Some((cipher, plaintext)) = resolved else {
            return Err(last_err);
        };

        debug!(path = %path.display(), bytes = plaintext.len(), "opened single-record file");
        Ok(Self {
            file,
            path: path.to_owned(),
            header,
            cipher: Some(cipher),
            plaintext,
            position: 0,
            dirty: false,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.plaintext.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let start = (self.position as usize).min(self.plaintext.len());
        let n = (self.plaintext.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&self.plaintext[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        let start = self.position as usize;
        if self.plaintext.len() < start + data.len() {
            self.plaintext.resize(start + data.len(), 0);
        }
        self.plaintext[start..start + data.len()].copy_from_slice(data);
        self.position += data.len() as u64;
        self.dirty = true;
        Ok(data.len())
    }

    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        let saved = self.position;
        self.position = offset;
        let result = self.read(buf);
        self.position = saved;
        result
    }

    pub fn write_at(&mut self, data: &[u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        let saved = self.position;
        self.position = offset;
        let result = self.write(data);
        self.position = saved;
        result
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        let len = self.plaintext.len() as i64;
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

    pub fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.ensure_open()?;
        if new_size != self.len() {
            self.plaintext.resize(new_size as usize, 0);
            self.dirty = true;
        }
        Ok(())
    }

    /// Re-encrypt the buffered plaintext under a fresh nonce and rewrite the
    /// whole backing file.
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.dirty {
            let nonce = generate_nonce();
            self.header.nonce = nonce.to_vec();
            let cipher = self.cipher.as_ref().ok_or(Error::Closed)?;
            let ciphertext = cipher.encrypt(&nonce, &self.plaintext)?;

            self.file
                .seek(SeekFrom::Start(0))
                .map_err(|e| Error::io("seek", &self.path, e))?;
            self.header.write_to(&mut self.file)?;
            self.file
                .write_all(&ciphertext)
                .map_err(|e| Error::io("write", &self.path, e))?;
            self.file
                .set_len(self.header.encoded_len() + ciphertext.len() as u64)
                .map_err(|e| Error::io("truncate", &self.path, e))?;
            self.dirty = false;
        }
        self.file
            .sync_all()
            .map_err(|e| Error::io("sync", &self.path, e))
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.sync()?;
        self.closed = true;
        self.cipher = None;
        self.plaintext = Vec::new();
        Ok(())
    }
}

impl Drop for BlobFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
