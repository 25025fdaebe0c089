//! File-based storage backend for persistent storage.

use crate::backend::KvBackend;
use crate::error::{StorageError, StorageResult};
use crate::log::{read_frame, Frame, LogRecord};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Name of the append-only log inside the cache directory.
pub const LOG_FILE: &str = "cache.log";
/// Name of the advisory lock file inside the cache directory.
pub const LOCK_FILE: &str = "LOCK";
const COMPACT_TEMP: &str = "cache.log.tmp";

/// Compaction is considered once at least this many records are dead.
const COMPACT_MIN_DEAD: usize = 256;

/// A file-based key/value backend.
///
/// Every mutation is appended to a single log file as a checksummed frame
/// and synced before the call returns. On open the log is replayed into an
/// in-memory index; a torn trailing frame left by a crash mid-append is cut
/// off so the next append starts on a clean boundary.
///
/// ```text
/// <dir>/
/// ├─ LOCK        # advisory lock, one writer per directory
/// └─ cache.log   # append-only frames
/// ```
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```no_run
/// use notesync_storage::{FileBackend, KvBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("offline-cache")).unwrap();
/// backend.put("anonymous/note/n1", b"persistent data").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    state: Mutex<LogState>,
    _lock_file: File,
}

#[derive(Debug)]
struct LogState {
    file: File,
    index: BTreeMap<String, Vec<u8>>,
    size: u64,
    dead_records: usize,
}

/// Size and liveness figures for a log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    /// Number of live keys.
    pub live_keys: usize,
    /// Records superseded by later writes.
    pub dead_records: usize,
    /// Log file size in bytes.
    pub file_size: u64,
}

impl FileBackend {
    /// Opens or creates a cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the directory cannot be
    /// created, is not a directory, or is locked by another process.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            StorageError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;
        if !dir.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "not a directory: {}",
                dir.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| StorageError::Unavailable(format!("cannot open lock file: {e}")))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Unavailable(format!(
                "{} is locked by another process",
                dir.display()
            )));
        }

        let log_path = dir.join(LOG_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)
            .map_err(|e| StorageError::Unavailable(format!("cannot open log: {e}")))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (index, valid_len, dead_records) = replay(&buf);

        if valid_len < buf.len() {
            tracing::warn!(
                path = %log_path.display(),
                discarded = buf.len() - valid_len,
                "truncating torn tail of cache log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        tracing::debug!(
            path = %log_path.display(),
            live = index.len(),
            dead = dead_records,
            "opened cache log"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(LogState {
                file,
                index,
                size: valid_len as u64,
                dead_records,
            }),
            _lock_file: lock_file,
        })
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns liveness and size figures for the log.
    pub fn stats(&self) -> LogStats {
        let state = self.state.lock();
        LogStats {
            live_keys: state.index.len(),
            dead_records: state.dead_records,
            file_size: state.size,
        }
    }

    /// Rewrites the log so it only holds live keys.
    ///
    /// Uses write-then-rename so a crash leaves either the old or the new
    /// log in place, never a mix.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<LogStats> {
        let mut state = self.state.lock();
        self.compact_locked(&mut state)?;
        Ok(LogStats {
            live_keys: state.index.len(),
            dead_records: state.dead_records,
            file_size: state.size,
        })
    }

    fn compact_locked(&self, state: &mut LogState) -> StorageResult<()> {
        let temp_path = self.dir.join(COMPACT_TEMP);
        let log_path = self.dir.join(LOG_FILE);

        let mut size = 0u64;
        {
            let mut temp = File::create(&temp_path)?;
            for (key, value) in &state.index {
                let frame = LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                }
                .encode_frame()?;
                temp.write_all(&frame)?;
                size += frame.len() as u64;
            }
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &log_path)?;

        state.file = OpenOptions::new().read(true).append(true).open(&log_path)?;
        tracing::debug!(
            removed = state.dead_records,
            old_size = state.size,
            new_size = size,
            "compacted cache log"
        );
        state.size = size;
        state.dead_records = 0;
        Ok(())
    }

    fn append(&self, state: &mut LogState, record: &LogRecord) -> StorageResult<()> {
        let frame = record.encode_frame()?;
        state.file.write_all(&frame)?;
        state.file.sync_data()?;
        state.size += frame.len() as u64;
        Ok(())
    }

    fn maybe_compact(&self, state: &mut LogState) -> StorageResult<()> {
        if state.dead_records >= COMPACT_MIN_DEAD && state.dead_records > state.index.len() {
            self.compact_locked(state)?;
        }
        Ok(())
    }
}

/// Replays frames into an index. Returns the index, the length of the valid
/// prefix and the number of superseded records.
fn replay(buf: &[u8]) -> (BTreeMap<String, Vec<u8>>, usize, usize) {
    let mut index = BTreeMap::new();
    let mut dead = 0usize;
    let mut offset = 0usize;

    loop {
        match read_frame(buf, offset) {
            Frame::Record(record, next) => {
                match record {
                    LogRecord::Put { key, value } => {
                        if index.insert(key, value).is_some() {
                            dead += 1;
                        }
                    }
                    LogRecord::Remove { key } => {
                        // The remove frame itself is dead weight as well
                        dead += if index.remove(&key).is_some() { 2 } else { 1 };
                    }
                }
                offset = next;
            }
            Frame::End => break,
            Frame::Torn(reason) => {
                tracing::warn!(offset, %reason, "stopping cache log replay at damaged frame");
                break;
            }
        }
    }

    (index, offset, dead)
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state.lock().index.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut state = self.state.lock();
        let record = LogRecord::Put {
            key: key.to_string(),
            value: value.to_vec(),
        };
        self.append(&mut state, &record)?;
        if state.index.insert(key.to_string(), value.to_vec()).is_some() {
            state.dead_records += 1;
        }
        self.maybe_compact(&mut state)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.lock();
        if !state.index.contains_key(key) {
            return Ok(false);
        }
        let record = LogRecord::Remove {
            key: key.to_string(),
        };
        self.append(&mut state, &record)?;
        state.index.remove(key);
        state.dead_records += 2;
        self.maybe_compact(&mut state)?;
        Ok(true)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .index
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.state.lock().index.len())
    }

    fn flush(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.file.flush()?;
        state.file.sync_all()?;
        Ok(())
    }
}
