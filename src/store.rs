use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::fs;
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;
use thiserror::Error as ThisError;
use tracing::{debug, info};

use crate::codec::{CodecError, FrameCodec};
use crate::frame::Frame;
use crate::model::{MusicBand, Record};

/// Version of the on-disk snapshot layout.
const SNAPSHOT_VERSION: i64 = 1;

#[derive(Debug, ThisError)]
pub enum PersistenceError {
    #[error("failed to access {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("snapshot is corrupted: {0}")]
    Corrupted(String),
}

/// The Store owns every record of the collection. It is thread-safe and cheap to clone: all
/// clones share the same state through reference counting.
///
/// Access goes through a single readers-writer lock. Queries take the shared side with
/// [`Store::read`], anything that changes the collection takes the exclusive side with
/// [`Store::write`]. Guards must not be held across an `.await`.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

pub struct InnerStore {
    state: RwLock<State>,
    // Held for a whole save so snapshots reach the disk in the order they were taken.
    save: Mutex<()>,
}

pub struct State {
    records: Vec<Record>,
    next_id: u64,
    initialized_at: DateTime<Utc>,
    last_saved_at: Option<DateTime<Utc>>,
    // Bumped by every mutation, compared against `saved_generation` to skip idle flushes.
    generation: u64,
    saved_generation: u64,
}

pub struct StoreRead<'a> {
    state: RwLockReadGuard<'a, State>,
}

pub struct StoreWrite<'a> {
    state: RwLockWriteGuard<'a, State>,
}

impl Store {
    pub fn new() -> Store {
        Store::from_state(State::new())
    }

    fn from_state(state: State) -> Store {
        Store {
            inner: Arc::new(InnerStore {
                state: RwLock::new(state),
                save: Mutex::new(()),
            }),
        }
    }

    /// Rebuilds a store from bytes produced by [`Store::persist`].
    pub fn load(bytes: &[u8]) -> Result<Store, PersistenceError> {
        State::load(bytes).map(Store::from_state)
    }

    /// Loads the collection from `path`. A missing or empty file yields an empty collection.
    pub fn open(path: impl AsRef<Path>) -> Result<Store, PersistenceError> {
        let path = path.as_ref();

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No data file at {}, starting empty", path.display());
                return Ok(Store::new());
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if bytes.is_empty() {
            return Ok(Store::new());
        }

        let store = Store::load(&bytes)?;
        info!(
            "Loaded {} records from {}",
            store.read().len(),
            path.display()
        );
        Ok(store)
    }

    /// Encodes the whole collection. Runs under the exclusive lock so the snapshot can't
    /// interleave with a mutation.
    pub fn persist(&self) -> Bytes {
        self.write().persist().freeze()
    }

    /// Atomically replaces the file at `path` with the current collection.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let _saving = self.inner.save.lock().unwrap_or_else(PoisonError::into_inner);
        self.save_locked(path.as_ref())
    }

    /// Saves only if something changed since the last save. Returns whether it wrote.
    pub fn flush(&self, path: impl AsRef<Path>) -> Result<bool, PersistenceError> {
        let _saving = self.inner.save.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.read().is_dirty() {
            return Ok(false);
        }
        self.save_locked(path.as_ref()).map(|_| true)
    }

    fn save_locked(&self, path: &Path) -> Result<(), PersistenceError> {
        let (bytes, generation) = {
            let state = self.write();
            (state.persist(), state.generation)
        };

        write_atomically(path, &bytes)?;

        self.write().mark_saved(generation);
        debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    pub fn read(&self) -> StoreRead<'_> {
        StoreRead {
            state: self
                .inner
                .state
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn write(&self) -> StoreWrite<'_> {
        StoreWrite {
            state: self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn new() -> State {
        State {
            records: Vec::new(),
            next_id: 1,
            initialized_at: Utc::now(),
            last_saved_at: None,
            generation: 0,
            saved_generation: 0,
        }
    }

    pub fn get(&self, id: u64) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Upserts a band. Without an id (or with id 0) the record is created under the next free
    /// id. With an id, an existing record is overwritten in place, keeping its creation
    /// timestamp, and a missing one is inserted under that id.
    pub fn put(&mut self, id: Option<u64>, band: MusicBand) -> &Record {
        self.generation += 1;

        let id = match id {
            Some(id) if id > 0 => id,
            _ => self.next_id,
        };
        if let Some(next) = id.checked_add(1) {
            self.next_id = self.next_id.max(next);
        }

        let index = match self.records.iter().position(|record| record.id == id) {
            Some(index) => {
                self.records[index].band = band;
                index
            }
            None => {
                self.records.push(Record {
                    id,
                    created_at: Utc::now(),
                    band,
                });
                self.records.len() - 1
            }
        };

        &self.records[index]
    }

    pub fn delete(&mut self, id: u64) -> Option<Record> {
        let index = self.records.iter().position(|record| record.id == id)?;
        self.generation += 1;
        Some(self.records.remove(index))
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Record> {
        if index >= self.records.len() {
            return None;
        }
        self.generation += 1;
        Some(self.records.remove(index))
    }

    /// Removes every record and returns how many there were. Ids are not reused.
    pub fn clear(&mut self) -> usize {
        let count = self.records.len();
        if count > 0 {
            self.generation += 1;
            self.records.clear();
        }
        count
    }

    pub fn shuffle(&mut self) {
        self.generation += 1;
        self.records.shuffle(&mut rand::thread_rng());
    }

    /// Records in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn initialized_at(&self) -> DateTime<Utc> {
        self.initialized_at
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    pub fn is_dirty(&self) -> bool {
        self.generation != self.saved_generation
    }

    fn mark_saved(&mut self, generation: u64) {
        self.saved_generation = self.saved_generation.max(generation);
        self.last_saved_at = Some(Utc::now());
    }

    fn persist(&self) -> BytesMut {
        let records = self.records.iter().map(Frame::from).collect();
        let frame = Frame::map()
            .with("version", Frame::Integer(SNAPSHOT_VERSION))
            .with("next_id", Frame::Integer(self.next_id as i64))
            .with("records", Frame::Array(records));

        FrameCodec::encode_message(&frame)
    }

    fn load(bytes: &[u8]) -> Result<State, PersistenceError> {
        let frame = FrameCodec::new(bytes.len())
            .decode_message(bytes)
            .map_err(|e: CodecError| PersistenceError::Corrupted(e.to_string()))?;

        match frame.get("version") {
            Some(Frame::Integer(SNAPSHOT_VERSION)) => {}
            other => {
                return Err(PersistenceError::Corrupted(format!(
                    "unsupported snapshot version {:?}",
                    other
                )))
            }
        }

        let frames = match frame.get("records") {
            Some(Frame::Array(frames)) => frames,
            _ => return Err(PersistenceError::Corrupted("missing records".to_string())),
        };

        let mut state = State::new();
        for (position, frame) in frames.iter().enumerate() {
            let record = Record::try_from(frame).map_err(|e| {
                PersistenceError::Corrupted(format!("record at position {}: {}", position, e))
            })?;
            if state.contains(record.id) {
                return Err(PersistenceError::Corrupted(format!(
                    "duplicate id {}",
                    record.id
                )));
            }
            if let Some(next) = record.id.checked_add(1) {
                state.next_id = state.next_id.max(next);
            }
            state.records.push(record);
        }

        match frame.get("next_id") {
            Some(Frame::Integer(next_id)) if *next_id > 0 => {
                state.next_id = state.next_id.max(*next_id as u64);
            }
            None => {}
            Some(other) => {
                return Err(PersistenceError::Corrupted(format!(
                    "invalid next_id {}",
                    other
                )))
            }
        }

        Ok(state)
    }
}

impl<'a> Deref for StoreRead<'a> {
    type Target = State;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'a> Deref for StoreWrite<'a> {
    type Target = State;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'a> DerefMut for StoreWrite<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

/// Writes to a temporary file in the target directory, then renames it over `path`. A crash
/// leaves either the old or the new file, never a partial one.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let io_error = |source: io::Error| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir).map_err(io_error)?;
    file.write_all(bytes).map_err(io_error)?;
    file.as_file().sync_all().map_err(io_error)?;
    file.persist(path).map_err(|e| io_error(e.error))?;

    Ok(())
}
