//! Storage Trait
//!
//! This module defines the `Storage` trait, the contract between the session
//! state machine and whatever persists its data.
//!
//! Implementors are responsible for:
//! - Upserting sessions (the same id is committed on every transition)
//! - Appending immutable captures and terminal lines
//! - Answering the read queries of the HTTP API
//! - Cleaning up old sessions together with their captures

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::{InterceptionSession, IntelligenceCapture, TerminalLine};
use crate::storage::types::SessionFilter;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or replaces the session with the same id.
    async fn commit_session(&self, session: &InterceptionSession) -> Result<(), StorageError>;

    async fn commit_capture(&self, capture: &IntelligenceCapture) -> Result<(), StorageError>;

    async fn commit_terminal_line(&self, line: &TerminalLine) -> Result<(), StorageError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<InterceptionSession>, StorageError>;

    /// Sessions matching `filter`, newest first.
    async fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<InterceptionSession>, StorageError>;

    /// Captures of one session, oldest first.
    async fn get_captures(&self, session_id: Uuid)
        -> Result<Vec<IntelligenceCapture>, StorageError>;

    /// The `limit` most recent terminal lines, oldest first.
    async fn recent_terminal_lines(&self, limit: usize) -> Result<Vec<TerminalLine>, StorageError>;

    /// Removes closed sessions settled before `older_than`, with their captures.
    async fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError>;
}
