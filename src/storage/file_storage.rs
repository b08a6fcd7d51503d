//! Filesystem backend.
//!
//! Layout under the base directory:
//! - `sessions/<id>.json`: one pretty-printed document per session, replaced
//!   atomically (write to a temp file, then rename) on every commit
//! - `captures/<session-id>.jsonl`: captures of a session, one per line
//! - `terminal.jsonl`: terminal lines, one per line. Once it holds twice the
//!   terminal capacity it is rewritten down to the newest `capacity` lines.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::{InterceptionSession, IntelligenceCapture, TerminalLine};
use crate::storage::memory_storage::MemoryStorage;
use crate::storage::storage_trait::Storage;
use crate::storage::types::SessionFilter;

pub struct FileStorage {
    base_path: PathBuf,
    // Serializes appends so concurrent lines never interleave.
    append_lock: Mutex<()>,
    terminal_capacity: usize,
    // Lines currently in terminal.jsonl.
    terminal_lines: Mutex<usize>,
}

impl FileStorage {
    pub async fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        Self::with_terminal_capacity(base_path, MemoryStorage::DEFAULT_TERMINAL_CAPACITY).await
    }

    pub async fn with_terminal_capacity<P: AsRef<Path>>(
        base_path: P,
        capacity: usize,
    ) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        for dir in [base_path.join("sessions"), base_path.join("captures")] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                error!("Failed to create directory {}: {}", dir.display(), e);
                StorageError::WriteFailed
            })?;
        }
        let terminal_path = base_path.join("terminal.jsonl");
        let existing = read_raw_lines(&terminal_path).await?.len();
        info!(
            "FileStorage initialized at {} ({} terminal line(s))",
            base_path.display(),
            existing
        );
        Ok(Self {
            base_path,
            append_lock: Mutex::new(()),
            terminal_capacity: capacity.max(1),
            terminal_lines: Mutex::new(existing),
        })
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join("sessions")
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", id))
    }

    fn captures_path(&self, session_id: Uuid) -> PathBuf {
        self.base_path
            .join("captures")
            .join(format!("{}.jsonl", session_id))
    }

    fn terminal_path(&self) -> PathBuf {
        self.base_path.join("terminal.jsonl")
    }

    async fn append_line<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize record for {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| {
                error!("Open append failed {}: {}", path.display(), e);
                StorageError::WriteFailed
            })?;
        file.write_all(line.as_bytes()).await.map_err(|e| {
            error!("Write failed {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        file.flush().await.map_err(|e| {
            error!("Flush failed {}: {}", path.display(), e);
            StorageError::WriteFailed
        })
    }

    /// Reads a JSON-lines file; a missing file is an empty list. Lines that do
    /// not parse are skipped with a warning.
    async fn read_lines<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>, StorageError> {
        let mut out = Vec::new();
        for (n, line) in read_raw_lines(path).await?.iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(value) => out.push(value),
                Err(e) => warn!("Skipping bad line {} in {}: {}", n + 1, path.display(), e),
            }
        }
        Ok(out)
    }

    /// Rewrites terminal.jsonl with only its newest `terminal_capacity` lines.
    async fn compact_terminal(&self) -> Result<usize, StorageError> {
        let path = self.terminal_path();
        let lines = read_raw_lines(&path).await?;
        let keep = &lines[lines.len().saturating_sub(self.terminal_capacity)..];
        let mut content = keep.join("\n");
        content.push('\n');

        let tmp = path.with_extension("jsonl.tmp");
        let _guard = self.append_lock.lock().await;
        fs::write(&tmp, content).await.map_err(|e| {
            error!("Failed to write {}: {}", tmp.display(), e);
            StorageError::WriteFailed
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            error!("Failed to move terminal log into {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        debug!("Compacted {} from {} to {} line(s)", path.display(), lines.len(), keep.len());
        Ok(keep.len())
    }

    async fn read_session_file(&self, path: &Path) -> Result<InterceptionSession, StorageError> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            error!("Failed to read session file {}: {}", path.display(), e);
            StorageError::ReadFailed
        })?;
        serde_json::from_str(&content).map_err(|e| {
            error!("Invalid session file {}: {}", path.display(), e);
            StorageError::ReadFailed
        })
    }

    async fn load_all_sessions(&self) -> Result<Vec<InterceptionSession>, StorageError> {
        let dir = self.sessions_dir();
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            error!("Failed to read sessions dir {}: {}", dir.display(), e);
            StorageError::ReadFailed
        })?;
        let mut sessions = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.read_session_file(&path).await {
                Ok(session) => sessions.push(session),
                Err(_) => warn!("Ignoring unreadable session file {}", path.display()),
            }
        }
        Ok(sessions)
    }
}

/// Non-blank lines of a file; a missing file has none.
async fn read_raw_lines(path: &Path) -> Result<Vec<String>, StorageError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => {
            error!("Read failed {}: {}", path.display(), e);
            Err(StorageError::ReadFailed)
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn commit_session(&self, session: &InterceptionSession) -> Result<(), StorageError> {
        let path = self.session_path(session.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session).map_err(|e| {
            error!("Failed to serialize session {}: {}", session.id, e);
            StorageError::WriteFailed
        })?;
        fs::write(&tmp, json).await.map_err(|e| {
            error!("Failed to write session file {}: {}", tmp.display(), e);
            StorageError::WriteFailed
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            error!("Failed to move session file into {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        debug!("Saved session {} to {}", session.id, path.display());
        Ok(())
    }

    async fn commit_capture(&self, capture: &IntelligenceCapture) -> Result<(), StorageError> {
        let path = self.captures_path(capture.session_id);
        self.append_line(&path, capture).await?;
        debug!("Appended capture {} to {}", capture.id, path.display());
        Ok(())
    }

    async fn commit_terminal_line(&self, line: &TerminalLine) -> Result<(), StorageError> {
        let mut count = self.terminal_lines.lock().await;
        self.append_line(&self.terminal_path(), line).await?;
        *count += 1;
        if *count > self.terminal_capacity * 2 {
            *count = self.compact_terminal().await?;
        }
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<InterceptionSession>, StorageError> {
        let path = self.session_path(id);
        match fs::try_exists(&path).await {
            Ok(true) => self.read_session_file(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(e) => {
                error!("Failed to stat {}: {}", path.display(), e);
                Err(StorageError::ReadFailed)
            }
        }
    }

    async fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<InterceptionSession>, StorageError> {
        let sessions = self.load_all_sessions().await?;
        let total = sessions.len();
        let sessions = filter.unwrap_or_default().apply(sessions);
        debug!("Loaded {} session(s), {} after filter", total, sessions.len());
        Ok(sessions)
    }

    async fn get_captures(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<IntelligenceCapture>, StorageError> {
        let mut captures: Vec<IntelligenceCapture> =
            self.read_lines(&self.captures_path(session_id)).await?;
        captures.sort_by_key(|c| c.captured_at);
        Ok(captures)
    }

    async fn recent_terminal_lines(&self, limit: usize) -> Result<Vec<TerminalLine>, StorageError> {
        let mut lines: Vec<TerminalLine> = self.read_lines(&self.terminal_path()).await?;
        let skip = lines.len().saturating_sub(limit);
        Ok(lines.split_off(skip))
    }

    async fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        for session in self.load_all_sessions().await? {
            if !session.is_closed() || session.settled_at() >= older_than {
                continue;
            }
            if let Err(e) = fs::remove_file(self.session_path(session.id)).await {
                warn!("Failed to remove session {}: {}", session.id, e);
                continue;
            }
            let _ = fs::remove_file(self.captures_path(session.id)).await;
            removed += 1;
        }
        info!(
            "Removed {} old session(s) (cutoff: {})",
            removed,
            older_than.to_rfc3339()
        );
        Ok(removed)
    }
}
