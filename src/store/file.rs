//! JSON file document store.
//!
//! All collections live in one file. Every write takes an exclusive lock on
//! a sibling `<file>.lock`, reloads the file, applies the change and replaces
//! the file atomically through a private temp file in the same directory.
//! Several processes can therefore share one store file without losing
//! records. On non-unix targets only writers in the same process are
//! serialized.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Document, DocumentStore, Filter, StoreError, newest_match};

/// Maximum file size for the store file (1MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    collections: BTreeMap<String, Vec<Document>>,
}

/// Exclusive advisory lock held for one read-modify-write cycle.
///
/// Released when the lock file handle is closed.
struct WriteLock {
    _file: fs::File,
}

impl WriteLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let mut options = fs::OpenOptions::new();
        options.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor belongs to `file`, which outlives the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }

        debug!("Store lock acquired: {}", path.display());
        Ok(Self { _file: file })
    }
}

/// File-backed document store.
#[derive(Debug)]
pub struct FileStore {
    /// Path to the store file.
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store backed by the given path. The file is created on the
    /// first write.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        assert!(!path.as_os_str().is_empty(), "path must not be empty");

        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Returns the default store path (`~/.netfleet/store.json`).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".netfleet")
            .join("store.json")
    }

    /// Returns the store file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the lock file path (`<store file>.lock`).
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn directory(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    fn load(&self) -> Result<StoreFile, StoreError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }

        let metadata = fs::metadata(&self.path)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge { max: MAX_FILE_SIZE });
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Runs `change` on the current file contents under both locks and saves
    /// the result when `change` reports a modification.
    fn update<R>(
        &self,
        change: impl FnOnce(&mut StoreFile) -> (R, bool),
    ) -> Result<R, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        fs::create_dir_all(self.directory())?;
        let _file_lock = WriteLock::acquire(&self.lock_path())?;

        let mut file = self.load()?;
        let (result, modified) = change(&mut file);
        if modified {
            self.save(&file)?;
        }
        Ok(result)
    }

    fn save(&self, file: &StoreFile) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(file)?;
        if content.len() as u64 > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge { max: MAX_FILE_SIZE });
        }

        let temp = self.write_temp(&content)?;
        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        debug!("Store written: {}", self.path.display());
        Ok(())
    }

    /// Writes `content` to a uniquely named temp file next to the store.
    ///
    /// The temp file is created with mode `0600`, so key material is never
    /// readable by other users, not even before the rename.
    fn write_temp(&self, content: &str) -> Result<NamedTempFile, StoreError> {
        let mut temp = NamedTempFile::new_in(self.directory())?;
        temp.write_all(content.as_bytes())?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        Ok(temp)
    }
}

impl DocumentStore for FileStore {
    fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        self.update(|file| {
            file.collections
                .entry(collection.to_string())
                .or_default()
                .push(doc);
            ((), true)
        })
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut file = self.load()?;
        Ok(file.collections.remove(collection).and_then(|mut docs| {
            newest_match(&docs, filter).map(|idx| docs.swap_remove(idx))
        }))
    }

    fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut file = self.load()?;
        Ok(file
            .collections
            .remove(collection)
            .map(|docs| docs.into_iter().filter(|d| filter.matches(d)).collect())
            .unwrap_or_default())
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        self.update(|file| {
            let removed = file
                .collections
                .get_mut(collection)
                .and_then(|docs| newest_match(docs, filter).map(|idx| docs.remove(idx)))
                .is_some();
            (removed, removed)
        })
    }
}
