//! Persistent token ↔ plaintext name catalog for the random filename mode.
//!
//! Persisted as human-readable JSON with only the forward map explicit:
//! ```json
//! { "mappings": { "3f2a…-uuid": "report.pdf" } }
//! ```
//! The reverse map is rebuilt on load. Lookups take the read lock; mutations
//! take the write lock and persist before returning, so minting a token is
//! atomic with the catalog hitting the backing store.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use shroud_core::{Error, Result};

use crate::vfs::{OpenOptions, Vfs};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDoc {
    /// token → plaintext component
    mappings: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct CatalogState {
    forward: BTreeMap<String, String>,
    reverse: HashMap<String, String>,
}

pub struct Catalog {
    path: PathBuf,
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Load the catalog from `path`, treating an absent file as empty.
    pub fn load(vfs: &dyn Vfs, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut state = CatalogState::default();

        match vfs.open(&path, &OpenOptions::read_only()) {
            Ok(mut file) => {
                let mut raw = String::new();
                file.read_to_string(&mut raw)
                    .map_err(|e| Error::io("read catalog", &path, e))?;
                let doc: CatalogDoc = serde_json::from_str(&raw)
                    .map_err(|e| Error::corruption(format!("catalog parse: {e}")))?;
                for (token, plain) in &doc.mappings {
                    state.reverse.insert(plain.clone(), token.clone());
                }
                state.forward = doc.mappings;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("open catalog", &path, e)),
        }

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("catalog lock poisoned").forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forward lookup: token → plaintext.
    pub fn plaintext_for(&self, token: &str) -> Option<String> {
        self.state
            .read()
            .expect("catalog lock poisoned")
            .forward
            .get(token)
            .cloned()
    }

    /// Reverse lookup: plaintext → token.
    pub fn token_for(&self, plaintext: &str) -> Option<String> {
        self.state
            .read()
            .expect("catalog lock poisoned")
            .reverse
            .get(plaintext)
            .cloned()
    }

    /// Record a fresh mapping and persist the catalog.
    pub fn insert(&self, vfs: &dyn Vfs, token: String, plaintext: String) -> Result<()> {
        {
            let mut state = self.state.write().expect("catalog lock poisoned");
            state.reverse.insert(plaintext.clone(), token.clone());
            state.forward.insert(token, plaintext);
        }
        self.save(vfs)
    }

    /// Persist the current mappings with a temp-file + rename replace.
    pub fn save(&self, vfs: &dyn Vfs) -> Result<()> {
        let doc = {
            let state = self.state.read().expect("catalog lock poisoned");
            CatalogDoc {
                mappings: state.forward.clone(),
            }
        };
        let raw = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::encryption("catalog encode", e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = vfs
                .open(&tmp, &OpenOptions::create_truncate())
                .map_err(|e| Error::io("create catalog tmp", &tmp, e))?;
            file.write_all(raw.as_bytes())
                .map_err(|e| Error::io("write catalog", &tmp, e))?;
            file.sync_all()
                .map_err(|e| Error::io("sync catalog", &tmp, e))?;
        }
        vfs.rename(&tmp, &self.path)
            .map_err(|e| Error::io("replace catalog", &self.path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemFs;

    #[test]
    fn absent_file_is_empty_catalog() {
        let fs = MemFs::new();
        let catalog = Catalog::load(&fs, "/names.json").unwrap();
        assert!(catalog.is_empty());
        assert!(catalog.plaintext_for("anything").is_none());
    }

    #[test]
    fn insert_then_lookup_both_ways() {
        let fs = MemFs::new();
        let catalog = Catalog::load(&fs, "/names.json").unwrap();
        catalog
            .insert(&fs, "token-1".into(), "report.pdf".into())
            .unwrap();

        assert_eq!(catalog.plaintext_for("token-1").unwrap(), "report.pdf");
        assert_eq!(catalog.token_for("report.pdf").unwrap(), "token-1");
        assert!(catalog.plaintext_for("token-2").is_none());
    }

    #[test]
    fn save_load_roundtrip_rebuilds_reverse_map() {
        let fs = MemFs::new();
        let catalog = Catalog::load(&fs, "/names.json").unwrap();
        catalog.insert(&fs, "t1".into(), "a.txt".into()).unwrap();
        catalog.insert(&fs, "t2".into(), "b.txt".into()).unwrap();

        let reloaded = Catalog::load(&fs, "/names.json").unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.plaintext_for("t2").unwrap(), "b.txt");
        assert_eq!(reloaded.token_for("a.txt").unwrap(), "t1");
    }

    #[test]
    fn persisted_form_is_forward_map_json() {
        let fs = MemFs::new();
        let catalog = Catalog::load(&fs, "/names.json").unwrap();
        catalog.insert(&fs, "tok".into(), "x.txt".into()).unwrap();

        let mut raw = String::new();
        fs.open(Path::new("/names.json"), &OpenOptions::read_only())
            .unwrap()
            .read_to_string(&mut raw)
            .unwrap();
        assert!(raw.contains("mappings"));
        assert!(raw.contains("tok"));
        assert!(raw.contains("x.txt"));
        assert!(!raw.contains("reverse"));
    }

    #[test]
    fn forward_and_reverse_stay_bijective() {
        let fs = MemFs::new();
        let catalog = Catalog::load(&fs, "/names.json").unwrap();
        for i in 0..20 {
            catalog
                .insert(&fs, format!("token-{i}"), format!("file-{i}.txt"))
                .unwrap();
        }
        let state = catalog.state.read().unwrap();
        assert_eq!(state.forward.len(), state.reverse.len());
        for (token, plain) in &state.forward {
            assert_eq!(state.reverse.get(plain), Some(token));
        }
    }

    #[test]
    fn garbage_catalog_is_corruption() {
        let fs = MemFs::new();
        fs.open(Path::new("/names.json"), &OpenOptions::create_truncate())
            .unwrap()
            .write_all(b"not json at all")
            .unwrap();
        assert!(matches!(
            Catalog::load(&fs, "/names.json"),
            Err(Error::Corruption { .. })
        ));
    }

    #[test]
    fn no_stray_temp_file_after_save() {
        let fs = MemFs::new();
        let catalog = Catalog::load(&fs, "/names.json").unwrap();
        catalog.insert(&fs, "t".into(), "f".into()).unwrap();
        assert!(!fs.exists(Path::new("/names.tmp")));
        assert!(fs.exists(Path::new("/names.json")));
    }
}
