use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Schema,
};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::{
    CaptureKind, InterceptionSession, IntelligenceCapture, LogLevel, SessionState, TerminalLine,
};
use crate::storage::db_entities::{captures, decode_time, encode_time, sessions, terminal_lines};
use crate::storage::storage_trait::Storage;
use crate::storage::types::SessionFilter;

impl TryFrom<sessions::Model> for InterceptionSession {
    type Error = StorageError;

    fn try_from(row: sessions::Model) -> Result<Self, Self::Error> {
        Ok(InterceptionSession {
            id: Uuid::parse_str(&row.id).map_err(|_| StorageError::ReadFailed)?,
            created_at: decode_time(&row.created_at)?,
            state: SessionState::from_str(&row.state).map_err(|_| StorageError::ReadFailed)?,
            scammer_ref: row.scammer_ref,
            message_count: row.message_count as u64,
            capture_count: row.capture_count as u64,
            last_activity_at: decode_time(&row.last_activity_at)?,
            closed_at: row.closed_at.as_deref().map(decode_time).transpose()?,
            close_reason: row.close_reason,
        })
    }
}

impl TryFrom<captures::Model> for IntelligenceCapture {
    type Error = StorageError;

    fn try_from(row: captures::Model) -> Result<Self, Self::Error> {
        let kind: CaptureKind = serde_json::from_value(serde_json::Value::String(row.kind))
            .map_err(|_| StorageError::ReadFailed)?;
        Ok(IntelligenceCapture {
            id: Uuid::parse_str(&row.id).map_err(|_| StorageError::ReadFailed)?,
            session_id: Uuid::parse_str(&row.session_id).map_err(|_| StorageError::ReadFailed)?,
            kind,
            payload: serde_json::from_str(&row.payload).map_err(|_| StorageError::ReadFailed)?,
            captured_at: decode_time(&row.captured_at)?,
        })
    }
}

impl TryFrom<terminal_lines::Model> for TerminalLine {
    type Error = StorageError;

    fn try_from(row: terminal_lines::Model) -> Result<Self, Self::Error> {
        Ok(TerminalLine {
            id: Uuid::parse_str(&row.id).map_err(|_| StorageError::ReadFailed)?,
            session_id: row
                .session_id
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()
                .map_err(|_| StorageError::ReadFailed)?,
            level: LogLevel::from_str(&row.level).map_err(|_| StorageError::ReadFailed)?,
            message: row.message,
            logged_at: decode_time(&row.logged_at)?,
        })
    }
}

/// SQLite backend through SeaORM. Tables are created on open if missing.
pub struct DatabaseStorage {
    db: DatabaseConnection,
}

impl DatabaseStorage {
    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create database directory {}: {}", parent.display(), e);
                StorageError::WriteFailed
            })?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let mut options = ConnectOptions::new(url);
        options.max_connections(5).sqlx_logging(false);
        let db = Database::connect(options).await.map_err(|e| {
            error!("Failed to open database {}: {}", path.display(), e);
            StorageError::ConnectionFailed
        })?;

        let storage = Self { db };
        storage.create_schema().await?;
        info!("DatabaseStorage initialized at {}", path.display());
        Ok(storage)
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut statements = [
            schema.create_table_from_entity(sessions::Entity),
            schema.create_table_from_entity(captures::Entity),
            schema.create_table_from_entity(terminal_lines::Entity),
        ];
        for stmt in statements.iter_mut() {
            self.db
                .execute(backend.build(stmt.if_not_exists()))
                .await
                .map_err(|e| {
                    error!("Failed to create schema: {}", e);
                    StorageError::WriteFailed
                })?;
        }
        Ok(())
    }
}

fn write_failed(e: sea_orm::DbErr) -> StorageError {
    error!("Database write failed: {}", e);
    StorageError::WriteFailed
}

fn read_failed(e: sea_orm::DbErr) -> StorageError {
    error!("Database read failed: {}", e);
    StorageError::ReadFailed
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn commit_session(&self, session: &InterceptionSession) -> Result<(), StorageError> {
        let row = sessions::ActiveModel {
            id: Set(session.id.to_string()),
            created_at: Set(encode_time(session.created_at)),
            state: Set(session.state.as_str().to_string()),
            scammer_ref: Set(session.scammer_ref.clone()),
            message_count: Set(session.message_count as i64),
            capture_count: Set(session.capture_count as i64),
            last_activity_at: Set(encode_time(session.last_activity_at)),
            closed_at: Set(session.closed_at.map(encode_time)),
            close_reason: Set(session.close_reason.clone()),
        };
        sessions::Entity::insert(row)
            .on_conflict(
                OnConflict::column(sessions::Column::Id)
                    .update_columns([
                        sessions::Column::State,
                        sessions::Column::ScammerRef,
                        sessions::Column::MessageCount,
                        sessions::Column::CaptureCount,
                        sessions::Column::LastActivityAt,
                        sessions::Column::ClosedAt,
                        sessions::Column::CloseReason,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(write_failed)?;
        debug!("[{}] session row committed", session.id);
        Ok(())
    }

    async fn commit_capture(&self, capture: &IntelligenceCapture) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&capture.payload).map_err(|e| {
            error!("Failed to serialize capture {}: {}", capture.id, e);
            StorageError::WriteFailed
        })?;
        let row = captures::ActiveModel {
            id: Set(capture.id.to_string()),
            session_id: Set(capture.session_id.to_string()),
            kind: Set(capture.kind.as_str().to_string()),
            payload: Set(payload),
            captured_at: Set(encode_time(capture.captured_at)),
        };
        captures::Entity::insert(row)
            .exec(&self.db)
            .await
            .map_err(write_failed)?;
        Ok(())
    }

    async fn commit_terminal_line(&self, line: &TerminalLine) -> Result<(), StorageError> {
        let row = terminal_lines::ActiveModel {
            seq: NotSet,
            id: Set(line.id.to_string()),
            session_id: Set(line.session_id.map(|id| id.to_string())),
            level: Set(line.level.as_str().to_string()),
            message: Set(line.message.clone()),
            logged_at: Set(encode_time(line.logged_at)),
        };
        terminal_lines::Entity::insert(row)
            .exec(&self.db)
            .await
            .map_err(write_failed)?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<InterceptionSession>, StorageError> {
        sessions::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(read_failed)?
            .map(InterceptionSession::try_from)
            .transpose()
    }

    async fn get_sessions(
        &self,
        filter: Option<SessionFilter>,
    ) -> Result<Vec<InterceptionSession>, StorageError> {
        let filter = filter.unwrap_or_default();
        let mut query = sessions::Entity::find();
        if let Some(state) = filter.state {
            query = query.filter(sessions::Column::State.eq(state.as_str()));
        }
        if let Some(ref scammer) = filter.scammer_ref {
            query = query.filter(sessions::Column::ScammerRef.eq(scammer.as_str()));
        }
        if let Some(after) = filter.created_after {
            query = query.filter(sessions::Column::CreatedAt.gte(encode_time(after)));
        }
        if let Some(before) = filter.created_before {
            query = query.filter(sessions::Column::CreatedAt.lte(encode_time(before)));
        }
        query = query
            .order_by_desc(sessions::Column::CreatedAt)
            .order_by_asc(sessions::Column::Id);
        if let Some(limit) = filter.limit {
            query = query.limit(limit as u64);
        }
        let rows = query.all(&self.db).await.map_err(read_failed)?;
        rows.into_iter().map(InterceptionSession::try_from).collect()
    }

    async fn get_captures(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<IntelligenceCapture>, StorageError> {
        let rows = captures::Entity::find()
            .filter(captures::Column::SessionId.eq(session_id.to_string()))
            .order_by_asc(captures::Column::CapturedAt)
            .all(&self.db)
            .await
            .map_err(read_failed)?;
        rows.into_iter().map(IntelligenceCapture::try_from).collect()
    }

    async fn recent_terminal_lines(&self, limit: usize) -> Result<Vec<TerminalLine>, StorageError> {
        let rows = terminal_lines::Entity::find()
            .order_by_desc(terminal_lines::Column::Seq)
            .limit(limit as u64)
            .all(&self.db)
            .await
            .map_err(read_failed)?;
        rows.into_iter().rev().map(TerminalLine::try_from).collect()
    }

    async fn cleanup_old_sessions(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let expired: Vec<String> = sessions::Entity::find()
            .filter(sessions::Column::State.eq(SessionState::Closed.as_str()))
            .filter(sessions::Column::ClosedAt.lt(encode_time(older_than)))
            .all(&self.db)
            .await
            .map_err(read_failed)?
            .into_iter()
            .map(|row| row.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        captures::Entity::delete_many()
            .filter(captures::Column::SessionId.is_in(expired.clone()))
            .exec(&self.db)
            .await
            .map_err(write_failed)?;
        let result = sessions::Entity::delete_many()
            .filter(sessions::Column::Id.is_in(expired))
            .exec(&self.db)
            .await
            .map_err(write_failed)?;
        info!(
            "Removed {} old session(s) (cutoff: {})",
            result.rows_affected,
            older_than.to_rfc3339()
        );
        Ok(result.rows_affected as usize)
    }
}
