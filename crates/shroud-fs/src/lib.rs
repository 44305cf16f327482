//! shroud-fs: transparent at-rest encryption over a byte-oriented store.
//!
//! [`EncryptFs`] wraps a backing [`Vfs`]: plaintext reads and writes against
//! virtual paths become authenticated-encrypted operations against the store.
//! Content files use the chunked layout from `shroud-format` (or a single
//! AEAD record when `chunk_size == 0`); filenames are translated per the
//! configured [`FilenameMode`].

pub mod blob;
pub mod cache;
pub mod catalog;
pub mod chunked;
pub mod filename;
pub mod handle;
mod parallel;
pub mod rotation;
pub mod vfs;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use shroud_core::{Config, Error, FilenameMode, Result};
use shroud_crypto::{derive_name_master_salt, derive_siv_key, KeyProvider};

pub use handle::EncryptedFile;
pub use rotation::{RotateOptions, RotationReport};
pub use vfs::{DirEntry, LocalFs, MemFs, Metadata, OpenOptions, Vfs, VfsFile};

pub use shroud_core::{CipherSuite, ParallelConfig};

use blob::BlobFile;
use catalog::Catalog;
use chunked::ChunkedFile;
use filename::{DeterministicNames, NameCipher, RandomNames};
use handle::FileInner;

/// Stat result for a virtual path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Plaintext size for files; 0 for directories.
    pub len: u64,
    pub is_dir: bool,
}

/// The filesystem facade: path translation plus file-strategy selection.
pub struct EncryptFs {
    vfs: Arc<dyn Vfs>,
    config: Config,
    provider: Arc<dyn KeyProvider>,
    names: NameCipher,
    catalog: Option<Arc<Catalog>>,
}

impl EncryptFs {
    /// Build a facade over `vfs` with the given provider and configuration.
    ///
    /// Filename-encrypting modes derive their master key here, from a fixed
    /// salt, so tokens are stable across processes.
    pub fn new(
        vfs: Arc<dyn Vfs>,
        provider: Arc<dyn KeyProvider>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;

        let mut catalog = None;
        let names = match config.filename_encryption {
            FilenameMode::None => NameCipher::Plain,
            FilenameMode::Deterministic => {
                let master = provider.derive_key(&derive_name_master_salt())?;
                let siv_key = derive_siv_key(&master)?;
                NameCipher::Deterministic(DeterministicNames::new(
                    &siv_key,
                    config.preserve_extensions,
                )?)
            }
            FilenameMode::Random => {
                let path = config
                    .catalog_path
                    .clone()
                    .ok_or_else(|| Error::validation("catalog_path", "required"))?;
                let loaded = Arc::new(Catalog::load(vfs.as_ref(), path)?);
                catalog = Some(loaded.clone());
                NameCipher::Random(RandomNames::new(loaded, vfs.clone()))
            }
        };

        Ok(Self {
            vfs,
            config,
            provider,
            names,
            catalog,
        })
    }

    /// The backing store this facade wraps.
    pub fn backing(&self) -> &Arc<dyn Vfs> {
        &self.vfs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Translate a virtual path to its on-store form.
    fn store_path(&self, path: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(self.names.encrypt_path(path)?))
    }

    /// True when a store-side path refers to the catalog document (or its
    /// temp file), which is infrastructure rather than user data.
    fn is_catalog_artifact(&self, store_path: &Path) -> bool {
        match &self.catalog {
            Some(catalog) => {
                store_path == catalog.path()
                    || store_path == catalog.path().with_extension("tmp")
            }
            None => false,
        }
    }

    // ── File access ───────────────────────────────────────────────────────

    /// Open an existing file for reading.
    pub fn open(&self, path: &str) -> Result<EncryptedFile> {
        self.open_with(path, &OpenOptions::read_only())
    }

    /// Create (or truncate) a file for reading and writing.
    pub fn create(&self, path: &str) -> Result<EncryptedFile> {
        self.open_with(path, &OpenOptions::create_truncate())
    }

    /// Open with explicit options.
    pub fn open_with(&self, path: &str, opts: &OpenOptions) -> Result<EncryptedFile> {
        self.open_as(path, opts, self.provider.as_ref(), self.config.cipher)
    }

    /// Open with an explicit provider and cipher; the rotation path uses
    /// this to write a file's new representation.
    fn open_as(
        &self,
        path: &str,
        opts: &OpenOptions,
        provider: &dyn KeyProvider,
        cipher: shroud_core::CipherSuite,
    ) -> Result<EncryptedFile> {
        let store = self.store_path(path)?;
        let file = self
            .vfs
            .open(&store, opts)
            .map_err(|e| Error::io("open", Path::new(path), e))?;

        let inner = if self.config.chunk_size > 0 {
            FileInner::Chunked(ChunkedFile::open(
                file,
                Path::new(path),
                provider,
                cipher,
                self.config.chunk_size,
                self.config.parallel.clone(),
            )?)
        } else {
            FileInner::Blob(BlobFile::open(file, Path::new(path), provider, cipher)?)
        };
        Ok(EncryptedFile::new(inner))
    }

    // ── Path-translated delegation ────────────────────────────────────────

    pub fn exists(&self, path: &str) -> bool {
        match self.store_path(path) {
            Ok(store) => self.vfs.exists(&store),
            Err(_) => false,
        }
    }

    pub fn stat(&self, path: &str) -> Result<FileStat> {
        let store = self.store_path(path)?;
        let meta = self
            .vfs
            .metadata(&store)
            .map_err(|e| Error::io("stat", Path::new(path), e))?;
        if meta.is_dir {
            return Ok(FileStat {
                len: 0,
                is_dir: true,
            });
        }
        // Physical size leaks content length modulo chunk padding; report
        // the cumulative plaintext size from the index instead.
        let file = self.open(path)?;
        let len = file.len()?;
        file.close()?;
        Ok(FileStat { len, is_dir: false })
    }

    pub fn mkdir_all(&self, path: &str) -> Result<()> {
        let store = self.store_path(path)?;
        self.vfs
            .create_dir_all(&store)
            .map_err(|e| Error::io("mkdir", Path::new(path), e))
    }

    pub fn remove_file(&self, path: &str) -> Result<()> {
        let store = self.store_path(path)?;
        self.vfs
            .remove_file(&store)
            .map_err(|e| Error::io("remove", Path::new(path), e))
    }

    pub fn remove_dir_all(&self, path: &str) -> Result<()> {
        let store = self.store_path(path)?;
        self.vfs
            .remove_dir_all(&store)
            .map_err(|e| Error::io("remove", Path::new(path), e))
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let store_from = self.store_path(from)?;
        let store_to = self.store_path(to)?;
        self.vfs
            .rename(&store_from, &store_to)
            .map_err(|e| Error::io("rename", Path::new(from), e))
    }

    /// List a directory with names translated back to plaintext. The
    /// catalog document itself is filtered out.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let store = self.store_path(path)?;
        let entries = self
            .vfs
            .read_dir(&store)
            .map_err(|e| Error::io("readdir", Path::new(path), e))?;

        let mut translated = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.is_catalog_artifact(&store.join(&entry.name)) {
                continue;
            }
            translated.push(DirEntry {
                name: self.names.decrypt_component(&entry.name)?,
                is_dir: entry.is_dir,
            });
        }
        translated.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(translated)
    }

    /// Change a file's plaintext size.
    pub fn truncate(&self, path: &str, new_size: u64) -> Result<()> {
        let file = self.open_with(path, &OpenOptions::read_write())?;
        file.truncate(new_size)?;
        file.close()
    }

    // ── Integrity ─────────────────────────────────────────────────────────

    /// Decrypt the whole file and discard the plaintext. Tampering or a
    /// wrong key surfaces as `Auth`/`Corruption`.
    pub fn verify(&self, path: &str) -> Result<()> {
        let file = self.open(path)?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
        }
        file.close()?;
        debug!(path, "verified");
        Ok(())
    }

    /// Verify every file under `root`; returns the paths that failed.
    pub fn verify_tree(&self, root: &str) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        self.walk_files(root, &mut |fs, path| {
            if fs.verify(path).is_err() {
                failed.push(path.to_owned());
            }
            Ok(())
        })?;
        Ok(failed)
    }

    /// Persist the filename catalog, if this mode carries one.
    pub fn sync_catalog(&self) -> Result<()> {
        match &self.catalog {
            Some(catalog) => catalog.save(self.vfs.as_ref()),
            None => Ok(()),
        }
    }

    /// Depth-first walk over virtual paths, calling `visit` for each file.
    pub(crate) fn walk_files(
        &self,
        root: &str,
        visit: &mut dyn FnMut(&Self, &str) -> Result<()>,
    ) -> Result<()> {
        for entry in self.read_dir(root)? {
            let child = if root.ends_with('/') {
                format!("{root}{}", entry.name)
            } else {
                format!("{root}/{}", entry.name)
            };
            if entry.is_dir {
                self.walk_files(&child, visit)?;
            } else {
                visit(self, &child)?;
            }
        }
        Ok(())
    }
}
