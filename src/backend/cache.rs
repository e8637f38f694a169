//! The module cache: compiled images keyed by module name and validated by a fingerprint of
//! the source they were compiled from.
//!
//! A store is either purely in memory or backed by a directory with one file per module.
//! Entries are read lazily on the first lookup of a module and written back by `flush`.
//! Every file is written to a temporary sibling first and renamed into place, so a crash
//! leaves either the old entry or the new one. Anything that fails to decode is treated as
//! a miss and removed on the next flush.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::wire::{Image, Reader, Writer};
use crate::error::{CacheError, FormatError};

pub const CACHE_MAGIC: &[u8; 4] = b"TRNC";
pub const CACHE_VERSION: u16 = 1;
const EXTENSION: &str = "tcache";

/// SHA-256 of a module's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(source: &str) -> Self {
        Fingerprint(Sha256::digest(source.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    fingerprint: Fingerprint,
    image: Image,
}

impl Entry {
    fn encode(&self, module: &str) -> Vec<u8> {
        let image = self.image.encode();
        let mut w = Writer::new();
        w.bytes(CACHE_MAGIC);
        w.u16(CACHE_VERSION);
        w.bytes(self.fingerprint.as_bytes());
        w.str(module);
        w.varint(image.len() as u64);
        w.bytes(&image);
        w.finish()
    }

    fn decode(bytes: &[u8], module: &str) -> Result<Self, FormatError> {
        let mut r = Reader::new(bytes);
        if r.take(4)? != CACHE_MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.u16()?;
        if version != CACHE_VERSION {
            return Err(FormatError::VersionMismatch {
                found: version,
                expected: CACHE_VERSION,
            });
        }
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(r.take(32)?);
        let name = r.str()?;
        if name != module {
            return Err(FormatError::Malformed(format!(
                "entry is for module `{}`",
                name
            )));
        }
        let len = r.varint()?;
        if len > r.remaining() as u64 {
            return Err(FormatError::Truncated {
                offset: bytes.len(),
            });
        }
        let image = Image::decode(r.take(len as usize)?)?;
        if r.remaining() != 0 {
            return Err(FormatError::Malformed(format!(
                "{} trailing bytes after the image",
                r.remaining()
            )));
        }
        Ok(Entry {
            fingerprint: Fingerprint(fingerprint),
            image,
        })
    }
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// The cache handed to `Compiler::compile_source`.
#[derive(Debug, Default)]
pub struct CacheStore {
    dir: Option<PathBuf>,
    entries: HashMap<String, Entry>,
    /// Modules whose entry has to be written by the next flush.
    dirty: BTreeSet<String>,
    /// Modules whose file has to be removed by the next flush.
    dropped: BTreeSet<String>,
}

impl CacheStore {
    /// A store that lives as long as the value does.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store backed by `dir`, which is created if it does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        debug!(dir = %dir.display(), "opened module cache");
        Ok(Self {
            dir: Some(dir),
            ..Self::default()
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// File holding the entry of `module`.
    pub fn entry_path(&self, module: &str) -> Option<PathBuf> {
        let file: String = module
            .chars()
            .map(|c| if std::path::is_separator(c) { '_' } else { c })
            .collect();
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", file, EXTENSION)))
    }

    fn read(&self, module: &str) -> Option<Result<Entry, FormatError>> {
        let path = self.entry_path(module)?;
        match fs::read(&path) {
            Ok(bytes) => Some(Entry::decode(&bytes, module)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => Some(Err(FormatError::Malformed(e.to_string()))),
        }
    }

    /// The cached image of `module` if it was compiled from exactly `source`. A stale or
    /// unreadable entry is a miss and is dropped.
    pub fn lookup(&mut self, module: &str, source: &str) -> Option<Image> {
        let fingerprint = Fingerprint::of(source);
        if !self.entries.contains_key(module) && !self.dropped.contains(module) {
            match self.read(module) {
                Some(Ok(entry)) => {
                    self.entries.insert(module.to_string(), entry);
                }
                Some(Err(e)) => {
                    warn!(module, error = %e, "discarding unreadable cache entry");
                    self.dropped.insert(module.to_string());
                }
                None => {}
            }
        }
        match self.entries.get(module) {
            Some(entry) if entry.fingerprint == fingerprint => {
                debug!(module, %fingerprint, "cache hit");
                Some(entry.image.clone())
            }
            Some(_) => {
                debug!(module, %fingerprint, "cache entry is stale");
                self.invalidate(module);
                None
            }
            None => {
                debug!(module, %fingerprint, "cache miss");
                None
            }
        }
    }

    pub fn insert(&mut self, module: &str, source: &str, image: Image) {
        let entry = Entry {
            fingerprint: Fingerprint::of(source),
            image,
        };
        self.entries.insert(module.to_string(), entry);
        self.dropped.remove(module);
        self.dirty.insert(module.to_string());
    }

    pub fn invalidate(&mut self, module: &str) {
        self.entries.remove(module);
        self.dirty.remove(module);
        self.dropped.insert(module.to_string());
    }

    /// Take over every entry of `other`, replacing entries of the same module.
    pub fn merge(&mut self, other: CacheStore) {
        for (module, entry) in other.entries {
            self.dropped.remove(&module);
            self.dirty.insert(module.clone());
            self.entries.insert(module, entry);
        }
    }

    /// Modules with an entry in memory.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Write new entries to disk and remove dropped ones.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if self.dir.is_none() {
            self.dirty.clear();
            self.dropped.clear();
            return Ok(());
        }
        for module in std::mem::take(&mut self.dropped) {
            if let Some(path) = self.entry_path(&module) {
                match fs::remove_file(&path) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => {
                        return Err(io_error(&path, e))
                    }
                    _ => {}
                }
            }
        }
        for module in std::mem::take(&mut self.dirty) {
            let (path, entry) = match (self.entry_path(&module), self.entries.get(&module)) {
                (Some(path), Some(entry)) => (path, entry),
                _ => continue,
            };
            write_atomically(&path, &entry.encode(&module))?;
            debug!(module = module.as_str(), path = %path.display(), "wrote cache entry");
        }
        Ok(())
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp).map_err(|e| io_error(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compiler::Compiler;
    use crate::frontend::parse_module;

    fn image(src: &str) -> Image {
        let program = Compiler::new()
            .compile_module(&parse_module("M", src).unwrap())
            .unwrap();
        Image::from_program(&program).unwrap()
    }

    const SRC1: &str = "def main = #+ 1 2";
    const SRC2: &str = "def main = #+ 1 3";

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            Fingerprint::of("").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(Fingerprint::of(SRC1), Fingerprint::of(SRC2));
    }

    #[test]
    fn test_changed_source_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.lookup("M", SRC1), None);
        store.insert("M", SRC1, image(SRC1));
        store.flush().unwrap();
        assert!(store.entry_path("M").unwrap().exists());

        let mut store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.lookup("M", SRC1), Some(image(SRC1)));

        let mut store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.lookup("M", SRC2), None);
        assert_eq!(store.lookup("M", SRC1), None);
        store.flush().unwrap();
        assert!(!store.entry_path("M").unwrap().exists());
    }

    #[test]
    fn test_truncated_entry_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::open(dir.path()).unwrap();
        store.insert("M", SRC1, image(SRC1));
        store.flush().unwrap();
        let path = store.entry_path("M").unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let mut store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.lookup("M", SRC1), None);
        store.flush().unwrap();
        assert!(!path.exists());
        // Nothing but complete entries is left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_merge_and_invalidate() {
        let mut store = CacheStore::in_memory();
        let mut other = CacheStore::in_memory();
        other.insert("M", SRC1, image(SRC1));
        other.insert("N", SRC2, image(SRC2));
        store.insert("M", SRC2, image(SRC2));
        store.merge(other);
        let mut modules: Vec<_> = store.modules().collect();
        modules.sort_unstable();
        assert_eq!(modules, vec!["M", "N"]);
        assert_eq!(store.lookup("M", SRC1), Some(image(SRC1)));
        store.invalidate("N");
        assert_eq!(store.lookup("N", SRC2), None);
        store.flush().unwrap();
    }

    #[test]
    fn test_compile_source_reuses_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CacheStore::open(dir.path()).unwrap();
        let first = Compiler::new()
            .compile_source("M", SRC1, &mut store)
            .unwrap();
        let mut store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.lookup("M", SRC1), Some(first));
        let second = Compiler::new()
            .compile_source("M", SRC2, &mut store)
            .unwrap();
        assert_eq!(second, image(SRC2));
    }
}
