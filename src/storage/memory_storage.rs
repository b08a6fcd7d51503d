use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::{InterceptionSession, IntelligenceCapture, TerminalLine};
use crate::storage::storage_trait::Storage;
use crate::storage::types::SessionFilter;

/// Keeps everything in process memory. Used for tests and for deployments
/// that only need the live feed.
pub struct MemoryStorage {
    sessions: RwLock<HashMap<Uuid, InterceptionSession>>,
    captures: RwLock<HashMap<Uuid, Vec<IntelligenceCapture>>>,
    terminal: RwLock<VecDeque<TerminalLine>>,
    terminal_capacity: usize,
}

impl MemoryStorage {
    pub const DEFAULT_TERMINAL_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::with_terminal_capacity(Self::DEFAULT_TERMINAL_CAPACITY)
    }

    /// Oldest terminal lines are discarded beyond `capacity`.
    pub fn with_terminal_capacity(capacity: usize) -> Self {
        info!("MemoryStorage initialized (terminal capacity {})", capacity);
        Self {
            sessions: RwLock::new(HashMap::new()),
            captures: RwLock::new(HashMap::new()),
            terminal: RwLock::new(VecDeque::new()),
            terminal_capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn commit_session(&self, session: &InterceptionSession) -> Result<(), StorageError> {
        self.sessions.write().insert(session.id, session.clone());
        Ok(())
    }

    async fn commit_capture(&self, capture: &IntelligenceCapture) -> Result<(), StorageError> {
        self.captures
            .write()
            .entry(capture.session_id)
            .or_default()
            .push(capture.clone());
        Ok(())
    }

    async fn commit_terminal_line(&self, line: &TerminalLine) -> Result<(), StorageError> {
        let mut terminal = self.terminal.write();
        if terminal.len() >= self.terminal_capacity {
            terminal.pop_front();
        }
        terminal.push_back(line.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<InterceptionSession>, StorageError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<InterceptionSession>, StorageError> {
        let all: Vec<InterceptionSession> = self.sessions.read().values().cloned().collect();
        Ok(filter.unwrap_or_default().apply(all))
    }

    async fn get_captures(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<IntelligenceCapture>, StorageError> {
        let mut captures = self
            .captures
            .read()
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        captures.sort_by_key(|c| c.captured_at);
        Ok(captures)
    }

    async fn recent_terminal_lines(&self, limit: usize) -> Result<Vec<TerminalLine>, StorageError> {
        let terminal = self.terminal.read();
        let skip = terminal.len().saturating_sub(limit);
        Ok(terminal.iter().skip(skip).cloned().collect())
    }

    async fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let expired: Vec<Uuid> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_closed() && s.settled_at() < older_than)
            .map(|s| s.id)
            .collect();
        {
            let mut sessions = self.sessions.write();
            let mut captures = self.captures.write();
            for id in &expired {
                sessions.remove(id);
                captures.remove(id);
            }
        }
        debug!("Removed {} old session(s) from memory", expired.len());
        Ok(expired.len())
    }
}
