//! Key rotation: re-encrypt files under a new provider or cipher.
//!
//! A file is rotated by decrypting it with the current keys, writing a new
//! representation to a sibling temp path under the new keys, and renaming
//! over the original. Tree rotation collects per-file failures and keeps
//! walking; a single bad file never aborts the sweep.

use std::sync::Arc;

use tracing::{debug, info, warn};

use shroud_core::{CipherSuite, Error, Result};
use shroud_crypto::KeyProvider;

use crate::vfs::OpenOptions;
use crate::EncryptFs;

/// Options for [`EncryptFs::re_encrypt`] and [`EncryptFs::rotate_tree`].
pub struct RotateOptions {
    /// Provider for the new representation.
    pub new_provider: Arc<dyn KeyProvider>,
    /// Cipher for the new representation; `None` keeps the current one.
    pub new_cipher: Option<CipherSuite>,
    /// Decrypt and report, but change nothing.
    pub dry_run: bool,
}

/// Outcome of a tree rotation.
#[derive(Default)]
pub struct RotationReport {
    pub rotated: usize,
    pub failed: Vec<(String, Error)>,
}

impl RotationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl EncryptFs {
    /// Re-encrypt one file under `opts.new_provider` (and optionally a new
    /// cipher). The swap is a rename, so a crash mid-rotation leaves the
    /// original untouched.
    pub fn re_encrypt(&self, path: &str, opts: &RotateOptions) -> Result<()> {
        let src = self.open(path)?;
        let mut content = Vec::new();
        src.read_to_end(&mut content)?;
        src.close()?;

        if opts.dry_run {
            debug!(path, bytes = content.len(), "dry run: would re-encrypt");
            return Ok(());
        }

        let cipher = opts.new_cipher.unwrap_or(self.config().cipher);
        let tmp_path = format!("{path}.rotate-tmp");
        let store_tmp = self.store_path(&tmp_path)?;

        let written = (|| -> Result<()> {
            let dst = self.open_as(
                &tmp_path,
                &OpenOptions::create_truncate(),
                opts.new_provider.as_ref(),
                cipher,
            )?;
            if !content.is_empty() {
                dst.write_bulk(&content)?;
            }
            dst.close()
        })();

        if let Err(e) = written {
            let _ = self.backing().remove_file(&store_tmp);
            return Err(e);
        }

        let store_final = self.store_path(path)?;
        self.backing()
            .rename(&store_tmp, &store_final)
            .map_err(|e| Error::io("rename", std::path::Path::new(path), e))?;

        info!(path, bytes = content.len(), "re-encrypted");
        Ok(())
    }

    /// One-way upgrade of a single-record file to the chunked layout.
    ///
    /// Reads the file with the single-record strategy regardless of the
    /// configured `chunk_size`, then rewrites it chunked under the current
    /// provider and cipher. The source must actually be a single-record
    /// file; a chunked source fails authentication.
    pub fn upgrade_to_chunked(&self, path: &str) -> Result<()> {
        if self.config().chunk_size == 0 {
            return Err(Error::validation(
                "chunk_size",
                "upgrading requires a chunked configuration",
            ));
        }

        let store = self.store_path(path)?;
        let backing = self
            .backing()
            .open(&store, &OpenOptions::read_only())
            .map_err(|e| Error::io("open", std::path::Path::new(path), e))?;
        let mut blob = crate::blob::BlobFile::open(
            backing,
            std::path::Path::new(path),
            self.provider.as_ref(),
            self.config().cipher,
        )?;
        let mut content = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = blob.read(&mut buf)?;
            if n == 0 {
                break;
            }
            content.extend_from_slice(&buf[..n]);
        }
        blob.close()?;

        let tmp_path = format!("{path}.upgrade-tmp");
        let store_tmp = self.store_path(&tmp_path)?;
        let written = (|| -> Result<()> {
            let dst = self.open_with(&tmp_path, &OpenOptions::create_truncate())?;
            if !content.is_empty() {
                dst.write_bulk(&content)?;
            }
            dst.close()
        })();
        if let Err(e) = written {
            let _ = self.backing().remove_file(&store_tmp);
            return Err(e);
        }

        self.backing()
            .rename(&store_tmp, &store)
            .map_err(|e| Error::io("rename", std::path::Path::new(path), e))?;
        info!(path, bytes = content.len(), "upgraded to chunked layout");
        Ok(())
    }

    /// Rotate every file under `root`. Errors are collected, not fatal.
    pub fn rotate_tree(&self, root: &str, opts: &RotateOptions) -> Result<RotationReport> {
        let mut report = RotationReport::default();
        self.walk_files(root, &mut |fs, path| {
            match fs.re_encrypt(path, opts) {
                Ok(()) => report.rotated += 1,
                Err(e) => {
                    warn!(path, error = %e, "re-encryption failed");
                    report.failed.push((path.to_owned(), e));
                }
            }
            Ok(())
        })?;
        info!(
            root,
            rotated = report.rotated,
            failed = report.failed.len(),
            "rotation sweep finished"
        );
        Ok(report)
    }
}
