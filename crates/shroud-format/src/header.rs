//! File header codec.
//!
//! ```text
//! u32  magic = 0x454E4352 ("ENCR")
//! u8   version = 1
//! u8   cipher
//! u16  salt_size
//! u8   salt[salt_size]
//! u16  nonce_size
//! u8   nonce[nonce_size]
//! ```
//! The trailing nonce only drives the single-record (non-chunked) strategy;
//! chunked files carry a nonce per chunk and ignore this one.

use std::io::{Read, Write};

use shroud_core::{CipherSuite, Error, Result};

use crate::{FORMAT_VERSION, MAGIC};

/// Sanity caps applied when reading untrusted headers.
const MAX_SALT_LEN: usize = 128;
const MAX_NONCE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub cipher: CipherSuite,
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl FileHeader {
    pub fn new(cipher: CipherSuite, salt: Vec<u8>, nonce: Vec<u8>) -> Self {
        Self { cipher, salt, nonce }
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> u64 {
        // magic + version + cipher + salt_size + salt + nonce_size + nonce
        (4 + 1 + 1 + 2 + self.salt.len() + 2 + self.nonce.len()) as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.validate()?;

        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.push(FORMAT_VERSION);
        buf.push(self.cipher.as_u8());
        buf.extend_from_slice(&(self.salt.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&(self.nonce.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.nonce);

        w.write_all(&buf)
            .map_err(|e| Error::io("write header", std::path::Path::new(""), e))
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = read_u32(r)?;
        if magic != MAGIC {
            return Err(Error::InvalidHeader);
        }

        let version = read_u8(r)?;
        if version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let cipher = CipherSuite::from_u8(read_u8(r)?)?;

        let salt_size = read_u16(r)? as usize;
        if salt_size == 0 || salt_size > MAX_SALT_LEN {
            return Err(Error::InvalidHeader);
        }
        let salt = read_exact(r, salt_size)?;

        let nonce_size = read_u16(r)? as usize;
        if nonce_size == 0 || nonce_size > MAX_NONCE_LEN {
            return Err(Error::InvalidHeader);
        }
        let nonce = read_exact(r, nonce_size)?;

        let header = Self { cipher, salt, nonce };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cipher == CipherSuite::Auto {
            // Auto must be resolved before anything is written to disk.
            return Err(Error::UnsupportedCipher(CipherSuite::Auto.as_u8()));
        }
        if self.salt.is_empty() || self.salt.len() > MAX_SALT_LEN {
            return Err(Error::InvalidHeader);
        }
        if self.nonce.is_empty() || self.nonce.len() > MAX_NONCE_LEN {
            return Err(Error::InvalidHeader);
        }
        Ok(())
    }
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    Ok(read_array::<R, 1>(r)?[0])
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array::<R, 2>(r)?))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array::<R, 4>(r)?))
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)
        .map_err(|e| Error::io("read header", std::path::Path::new(""), e))?;
    Ok(buf)
}

fn read_exact<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)
        .map_err(|e| Error::io("read header", std::path::Path::new(""), e))?;
    Ok(buf)
}
