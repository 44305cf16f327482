//! Backing-store abstraction: seekable byte files plus directory mutation.
//!
//! This is the narrow seam the encryption layer sits on. `LocalFs` maps
//! virtual absolute paths onto a root directory on the real filesystem;
//! `MemFs` keeps everything in memory and backs most of the test suite.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Open intent for [`Vfs::open`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            ..Self::default()
        }
    }

    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
        }
    }
}

/// Minimal stat result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub len: u64,
    pub is_dir: bool,
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// An open byte file: random access, truncation, durability.
pub trait VfsFile: Read + Write + Seek + Send {
    fn sync_all(&mut self) -> io::Result<()>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn byte_len(&mut self) -> io::Result<u64>;
}

/// The backing store contract: byte-addressable files and directory mutation.
pub trait Vfs: Send + Sync {
    fn open(&self, path: &Path, opts: &OpenOptions) -> io::Result<Box<dyn VfsFile>>;
    fn metadata(&self, path: &Path) -> io::Result<Metadata>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }
}

// ── Local filesystem backend ──────────────────────────────────────────────

/// Backing store rooted at a real directory.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a virtual path under the root, refusing traversal components.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes the store root: {}", path.display()),
                    ));
                }
            }
        }
        Ok(resolved)
    }
}

struct LocalFile(std::fs::File);

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for LocalFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Seek for LocalFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl VfsFile for LocalFile {
    fn sync_all(&mut self) -> io::Result<()> {
        self.0.sync_all()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.0.set_len(len)
    }

    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.0.metadata()?.len())
    }
}

impl Vfs for LocalFs {
    fn open(&self, path: &Path, opts: &OpenOptions) -> io::Result<Box<dyn VfsFile>> {
        let resolved = self.resolve(path)?;
        if opts.create {
            if let Some(parent) = resolved.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .read(opts.read)
            .write(opts.write)
            .create(opts.create)
            .truncate(opts.truncate)
            .open(&resolved)?;
        Ok(Box::new(LocalFile(file)))
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        let meta = std::fs::metadata(self.resolve(path)?)?;
        Ok(Metadata {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(self.resolve(path)?)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(self.resolve(path)?)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path)?)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(self.resolve(path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(self.resolve(from)?, self.resolve(to)?)
    }
}

// ── In-memory backend ─────────────────────────────────────────────────────

#[derive(Default)]
struct MemState {
    files: HashMap<PathBuf, Arc<RwLock<Vec<u8>>>>,
    dirs: Vec<PathBuf>,
}

/// In-memory backing store for tests and tooling.
#[derive(Default)]
pub struct MemFs {
    state: Mutex<MemState>,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

struct MemFile {
    data: Arc<RwLock<Vec<u8>>>,
    pos: u64,
    writable: bool,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.read().expect("memfs lock poisoned");
        let start = (self.pos as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened read-only",
            ));
        }
        let mut data = self.data.write().expect("memfs lock poisoned");
        let start = self.pos as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.read().expect("memfs lock poisoned").len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl VfsFile for MemFile {
    fn sync_all(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let mut data = self.data.write().expect("memfs lock poisoned");
        data.resize(len as usize, 0);
        Ok(())
    }

    fn byte_len(&mut self) -> io::Result<u64> {
        Ok(self.data.read().expect("memfs lock poisoned").len() as u64)
    }
}

impl Vfs for MemFs {
    fn open(&self, path: &Path, opts: &OpenOptions) -> io::Result<Box<dyn VfsFile>> {
        let path = normalize(path);
        let mut state = self.state.lock().expect("memfs lock poisoned");
        let data = match state.files.get(&path) {
            Some(data) => {
                if opts.truncate {
                    data.write().expect("memfs lock poisoned").clear();
                }
                data.clone()
            }
            None => {
                if !opts.create {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no such file: {}", path.display()),
                    ));
                }
                let data = Arc::new(RwLock::new(Vec::new()));
                state.files.insert(path.clone(), data.clone());
                data
            }
        };
        Ok(Box::new(MemFile {
            data,
            pos: 0,
            writable: opts.write,
        }))
    }

    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        let path = normalize(path);
        let state = self.state.lock().expect("memfs lock poisoned");
        if let Some(data) = state.files.get(&path) {
            return Ok(Metadata {
                len: data.read().expect("memfs lock poisoned").len() as u64,
                is_dir: false,
            });
        }
        let is_dir = path == Path::new("/")
            || state.dirs.iter().any(|d| d == &path)
            || state.files.keys().any(|f| f.starts_with(&path) && f != &path);
        if is_dir {
            return Ok(Metadata { len: 0, is_dir: true });
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such path: {}", path.display()),
        ))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = normalize(path);
        let state = self.state.lock().expect("memfs lock poisoned");
        let mut names: Vec<DirEntry> = Vec::new();
        let push_unique = |entry: DirEntry, names: &mut Vec<DirEntry>| {
            if !names.iter().any(|e| e.name == entry.name) {
                names.push(entry);
            }
        };
        for file in state.files.keys() {
            if let Ok(rest) = file.strip_prefix(&path) {
                let mut components = rest.components();
                if let Some(Component::Normal(first)) = components.next() {
                    let is_dir = components.next().is_some();
                    push_unique(
                        DirEntry {
                            name: first.to_string_lossy().into_owned(),
                            is_dir,
                        },
                        &mut names,
                    );
                }
            }
        }
        for dir in &state.dirs {
            if let Ok(rest) = dir.strip_prefix(&path) {
                if let Some(Component::Normal(first)) = rest.components().next() {
                    push_unique(
                        DirEntry {
                            name: first.to_string_lossy().into_owned(),
                            is_dir: true,
                        },
                        &mut names,
                    );
                }
            }
        }
        names.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(names)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut state = self.state.lock().expect("memfs lock poisoned");
        if !state.dirs.contains(&path) {
            state.dirs.push(path);
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut state = self.state.lock().expect("memfs lock poisoned");
        state.files.remove(&path).map(|_| ()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        let mut state = self.state.lock().expect("memfs lock poisoned");
        state.files.retain(|p, _| !p.starts_with(&path));
        state.dirs.retain(|p| !p.starts_with(&path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let from = normalize(from);
        let to = normalize(to);
        let mut state = self.state.lock().expect("memfs lock poisoned");
        match state.files.remove(&from) {
            Some(data) => {
                state.files.insert(to, data);
                Ok(())
            }
            None => {
                // Directory rename: move every entry under the prefix.
                let moved: Vec<(PathBuf, Arc<RwLock<Vec<u8>>>)> = state
                    .files
                    .iter()
                    .filter(|(p, _)| p.starts_with(&from))
                    .map(|(p, d)| (p.clone(), d.clone()))
                    .collect();
                if moved.is_empty() && !state.dirs.contains(&from) {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no such path: {}", from.display()),
                    ));
                }
                for (old, data) in moved {
                    let rest = old.strip_prefix(&from).expect("prefix checked");
                    state.files.remove(&old);
                    state.files.insert(to.join(rest), data);
                }
                for dir in state.dirs.iter_mut() {
                    if dir.starts_with(&from) {
                        let rest = dir
                            .strip_prefix(&from)
                            .expect("prefix checked")
                            .to_path_buf();
                        *dir = to.join(rest);
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_on(fs: &dyn Vfs) {
        let path = Path::new("/dir/file.bin");
        let mut f = fs.open(path, &OpenOptions::create_truncate()).unwrap();
        f.write_all(b"hello backing store").unwrap();
        f.sync_all().unwrap();
        drop(f);

        let meta = fs.metadata(path).unwrap();
        assert_eq!(meta.len, 19);
        assert!(!meta.is_dir);

        let mut f = fs.open(path, &OpenOptions::read_only()).unwrap();
        f.seek(SeekFrom::Start(6)).unwrap();
        let mut buf = String::new();
        f.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "backing store");
    }

    #[test]
    fn local_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        roundtrip_on(&LocalFs::new(dir.path()));
    }

    #[test]
    fn mem_fs_roundtrip() {
        roundtrip_on(&MemFs::new());
    }

    #[test]
    fn local_fs_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        assert!(fs
            .open(Path::new("/../escape"), &OpenOptions::create_truncate())
            .is_err());
    }

    #[test]
    fn mem_fs_listing_and_rename() {
        let fs = MemFs::new();
        for name in ["/a/x.txt", "/a/y.txt", "/a/sub/z.txt"] {
            fs.open(Path::new(name), &OpenOptions::create_truncate())
                .unwrap()
                .write_all(b"data")
                .unwrap();
        }

        let entries = fs.read_dir(Path::new("/a")).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "x.txt", "y.txt"]);
        assert!(entries.iter().find(|e| e.name == "sub").unwrap().is_dir);

        fs.rename(Path::new("/a/x.txt"), Path::new("/a/renamed.txt"))
            .unwrap();
        assert!(!fs.exists(Path::new("/a/x.txt")));
        assert!(fs.exists(Path::new("/a/renamed.txt")));

        fs.rename(Path::new("/a/sub"), Path::new("/b")).unwrap();
        assert!(fs.exists(Path::new("/b/z.txt")));

        fs.remove_dir_all(Path::new("/a")).unwrap();
        assert!(!fs.exists(Path::new("/a/y.txt")));
    }

    #[test]
    fn mem_fs_missing_file_errors() {
        let fs = MemFs::new();
        assert!(fs
            .open(Path::new("/absent"), &OpenOptions::read_only())
            .is_err());
        assert!(fs.remove_file(Path::new("/absent")).is_err());
    }

    #[test]
    fn set_len_truncates_and_extends() {
        let fs = MemFs::new();
        let path = Path::new("/f");
        let mut f = fs.open(path, &OpenOptions::create_truncate()).unwrap();
        f.write_all(&[1, 2, 3, 4]).unwrap();
        f.set_len(2).unwrap();
        assert_eq!(f.byte_len().unwrap(), 2);
        f.set_len(6).unwrap();
        assert_eq!(f.byte_len().unwrap(), 6);
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 0, 0, 0, 0]);
    }
}
