//! Durable per-room message logs.
//!
//! Each room owns one human-readable file, `history_<room>.txt`, inside the
//! history directory. A line in the file is exactly one broadcast line
//! (`sender: text`) in arrival order; there is no header or framing beyond
//! the newline, so the files can be inspected or tailed directly.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::ChatError;

const LOG_PREFIX: &str = "history_";
const LOG_SUFFIX: &str = ".txt";

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file backing `room`.
    pub fn log_path(&self, room: &str) -> PathBuf {
        self.dir.join(format!("{LOG_PREFIX}{room}{LOG_SUFFIX}"))
    }

    /// Creates the history directory if it is missing. Succeeds when it
    /// already exists.
    pub async fn ensure_storage(&self) -> Result<(), ChatError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ChatError::storage(&self.dir, source))
    }

    /// Creates an empty log for `room` so the room is visible on disk before
    /// anyone has spoken in it. An existing log is left untouched.
    pub async fn create_log(&self, room: &str) -> Result<(), ChatError> {
        self.ensure_storage().await?;
        let path = self.log_path(room);
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| ChatError::storage(&path, source))?;
        Ok(())
    }

    /// Appends one line to the room's log.
    ///
    /// The line and its terminator go out in a single write; callers
    /// serialize appends through the registry lock.
    pub async fn append(&self, room: &str, line: &str) -> Result<(), ChatError> {
        self.ensure_storage().await?;
        let path = self.log_path(room);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| ChatError::storage(&path, source))?;

        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');
        file.write_all(record.as_bytes())
            .await
            .map_err(|source| ChatError::storage(&path, source))?;
        file.flush()
            .await
            .map_err(|source| ChatError::storage(&path, source))?;
        Ok(())
    }

    /// Reads every room log in the directory, keyed by room name, each in
    /// file order.
    ///
    /// Files that don't follow the `history_<room>.txt` naming are ignored.
    /// A log that cannot be read is skipped with a warning so one damaged
    /// file doesn't keep the other rooms from coming back.
    pub async fn load_all(&self) -> Result<BTreeMap<String, Vec<String>>, ChatError> {
        self.ensure_storage().await?;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|source| ChatError::storage(&self.dir, source))?;

        let mut rooms = BTreeMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ChatError::storage(&self.dir, source))?
        {
            let file_name = entry.file_name();
            let Some(room) = file_name.to_str().and_then(room_from_file_name) else {
                continue;
            };

            let path = entry.path();
            match fs::read(&path).await {
                Ok(bytes) => {
                    let lines: Vec<String> = String::from_utf8_lossy(&bytes)
                        .lines()
                        .map(str::to_string)
                        .collect();
                    debug!(room, lines = lines.len(), "loaded room history");
                    rooms.insert(room.to_string(), lines);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = ?err, "skipping unreadable history log")
                }
            }
        }

        Ok(rooms)
    }
}

fn room_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(LOG_PREFIX)?
        .strip_suffix(LOG_SUFFIX)
        .filter(|room| !room.is_empty())
}
