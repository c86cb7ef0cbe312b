//! Process-scoped cache of server file content keyed by `(path, revision)`.
//!
//! Content of a file at a historical revision never changes, so the pair is a
//! safe cache key for the whole run. Entries live as files in one ephemeral
//! directory created on first use. The directory is removed by an explicit
//! [`ContentStore::cleanup`] call in the shutdown path; a hard crash leaves it
//! behind, which is harmless since everything in it can be fetched again.
//!
//! Lookups may run concurrently. Each key has at most one writer: a second
//! [`ContentStore::create`] for the same key is rejected. A slot is written
//! to a temp file and only becomes visible to lookups once that file has been
//! flushed and renamed into place.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::errors::StoreError;
use crate::path::ServerPath;

const DIR_PREFIX: &str = "tfvcresolve-content-";
const PARENT_HASH_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Keys & handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContentKey {
    path: ServerPath,
    revision: i32,
}

/// Reference to one cached blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHandle {
    key: ContentKey,
    file: PathBuf,
}

impl ContentHandle {
    pub fn path(&self) -> &ServerPath {
        &self.key.path
    }

    pub fn revision(&self) -> i32 {
        self.key.revision
    }

    /// Backing file on disk.
    pub fn file(&self) -> &Path {
        &self.file
    }
}

/// Whether a slot's content has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Filling,
    Ready,
}

#[derive(Debug)]
struct Slot {
    file: PathBuf,
    state: SlotState,
}

/// Deterministic entry file name: `<parent hash>_<leaf>_<revision>`.
pub fn entry_file_name(path: &ServerPath, revision: i32) -> String {
    let parent = path.parent().unwrap_or_else(ServerPath::root);
    let digest = hex::encode(Sha256::digest(parent.as_str().as_bytes()));
    format!(
        "{}_{}_{}",
        &digest[..PARENT_HASH_LEN],
        path.last_component(),
        revision
    )
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The content cache.
#[derive(Debug, Default)]
pub struct ContentStore {
    /// Where the ephemeral directory is created. `None` uses the system temp
    /// directory.
    base_dir: Option<PathBuf>,
    root: Mutex<Option<TempDir>>,
    entries: RwLock<HashMap<ContentKey, Slot>>,
}

impl ContentStore {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            root: Mutex::new(None),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Non-creating lookup. Slots still being filled are not returned.
    pub fn find(&self, path: &ServerPath, revision: i32) -> Option<ContentHandle> {
        let key = ContentKey {
            path: path.clone(),
            revision,
        };
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&key)
            .filter(|slot| slot.state == SlotState::Ready)
            .map(|slot| ContentHandle {
                key: key.clone(),
                file: slot.file.clone(),
            })
    }

    /// Reserve a new slot for filling. Callers must [`find`](Self::find) first.
    pub fn create(&self, path: &ServerPath, revision: i32) -> Result<ContentHandle, StoreError> {
        let key = ContentKey {
            path: path.clone(),
            revision,
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return Err(StoreError::SlotExists {
                path: path.to_string(),
                revision,
            });
        }

        let file = self.ensure_root()?.join(entry_file_name(path, revision));
        debug!(path = %path, revision, file = %file.display(), "reserved content slot");
        entries.insert(
            key.clone(),
            Slot {
                file: file.clone(),
                state: SlotState::Filling,
            },
        );
        Ok(ContentHandle { key, file })
    }

    /// Fill a reserved slot by handing `write` a writer over a temp file,
    /// then publishing it.
    ///
    /// On any failure the slot is dropped, so a later lookup misses and the
    /// content is fetched again.
    pub fn save_content<F, E>(&self, handle: &ContentHandle, write: F) -> Result<(), E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<StoreError>,
    {
        match self.slot_state(&handle.key) {
            Some(SlotState::Filling) => {}
            Some(SlotState::Ready) => {
                return Err(StoreError::SlotExists {
                    path: handle.path().to_string(),
                    revision: handle.revision(),
                }
                .into())
            }
            None => {
                return Err(StoreError::UnknownHandle {
                    path: handle.path().to_string(),
                    revision: handle.revision(),
                }
                .into())
            }
        }

        match self.write_slot(handle, write) {
            Ok(()) => {
                self.publish(&handle.key);
                Ok(())
            }
            Err(e) => {
                warn!(path = %handle.path(), revision = handle.revision(), "failed to fill content slot, discarding it");
                self.discard(&handle.key);
                Err(e)
            }
        }
    }

    fn write_slot<F, E>(&self, handle: &ContentHandle, write: F) -> Result<(), E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<StoreError>,
    {
        let dir = handle.file.parent().unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir).map_err(StoreError::Io)?;
        let mut writer = BufWriter::new(temp);
        write(&mut writer)?;
        let temp = writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;
        temp.persist(&handle.file)
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    /// Fill a slot with `bytes`.
    pub fn save_bytes(&self, handle: &ContentHandle, bytes: &[u8]) -> Result<(), StoreError> {
        self.save_content(handle, |w| w.write_all(bytes).map_err(StoreError::Io))
    }

    /// Read back a slot's content.
    pub fn load_content(&self, handle: &ContentHandle) -> Result<Vec<u8>, StoreError> {
        fs::read(&handle.file).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::Missing {
                path: handle.path().to_string(),
                revision: handle.revision(),
                file: handle.file.clone(),
            },
            _ => StoreError::Io(e),
        })
    }

    /// Return cached content, calling `fetch` to fill the slot on a miss.
    ///
    /// If another caller is filling the same slot, `fetch` runs into memory
    /// and the result is returned without being cached.
    pub fn get_or_fetch<F, E>(&self, path: &ServerPath, revision: i32, fetch: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<StoreError>,
    {
        if let Some(handle) = self.find(path, revision) {
            debug!(path = %path, revision, "content cache hit");
            return Ok(self.load_content(&handle)?);
        }

        debug!(path = %path, revision, "content cache miss");
        let handle = match self.create(path, revision) {
            Ok(handle) => handle,
            Err(StoreError::SlotExists { .. }) => {
                if let Some(handle) = self.find(path, revision) {
                    return Ok(self.load_content(&handle)?);
                }
                debug!(path = %path, revision, "slot is being filled elsewhere, fetching uncached");
                let mut buf = Vec::new();
                fetch(&mut buf)?;
                return Ok(buf);
            }
            Err(e) => return Err(e.into()),
        };
        self.save_content(&handle, fetch)?;
        Ok(self.load_content(&handle)?)
    }

    /// Evict one entry. Returns whether it existed.
    pub fn invalidate(&self, path: &ServerPath, revision: i32) -> Result<bool, StoreError> {
        let key = ContentKey {
            path: path.clone(),
            revision,
        };
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        match removed {
            Some(slot) => {
                match fs::remove_file(&slot.file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::Io(e)),
                }
                debug!(path = %path, revision, "invalidated content slot");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|slot| slot.state == SlotState::Ready)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ephemeral directory, if it has been created.
    pub fn root_dir(&self) -> Option<PathBuf> {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
    }

    /// Remove the ephemeral directory and forget every entry. Safe to call
    /// more than once; the store recreates its directory on next use.
    pub fn cleanup(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();

        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(dir) = root {
            let path = dir.path().to_path_buf();
            dir.close()?;
            info!(dir = %path.display(), entries = count, "content store cleaned up");
        }
        Ok(())
    }

    fn ensure_root(&self) -> Result<PathBuf, StoreError> {
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(dir) = root.as_ref() {
            return Ok(dir.path().to_path_buf());
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);
        let dir = match &self.base_dir {
            Some(base) => {
                fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        info!(dir = %path.display(), "created content store directory");
        *root = Some(dir);
        Ok(path)
    }

    fn slot_state(&self, key: &ContentKey) -> Option<SlotState> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|slot| slot.state)
    }

    fn publish(&self, key: &ContentKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = entries.get_mut(key) {
            slot.state = SlotState::Ready;
        }
    }

    fn discard(&self, key: &ContentKey) {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(slot) = removed {
            let _ = fs::remove_file(slot.file);
        }
    }
}
