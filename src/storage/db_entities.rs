//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `sessions`: one row per interception session, upserted on every transition
//! - `captures`: immutable intelligence captures, belonging to a session
//! - `terminal_lines`: the dashboard console feed, in insertion order
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings so that string
//! ordering matches time ordering.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error_handling::types::StorageError;

pub(crate) fn encode_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::ReadFailed)
}

/// Sessions table entity model.
pub mod sessions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "sessions")]
    pub struct Model {
        /// UUID as string primary key
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub created_at: String,
        /// `PENDING`, `ACTIVE` or `CLOSED`
        pub state: String,
        pub scammer_ref: Option<String>,
        pub message_count: i64,
        pub capture_count: i64,
        pub last_activity_at: String,
        pub closed_at: Option<String>,
        pub close_reason: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::captures::Entity")]
        Captures,
    }

    impl Related<super::captures::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Captures.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Captures table entity model.
pub mod captures {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "captures")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        /// Foreign key to `sessions.id`
        pub session_id: String,
        pub kind: String,
        /// JSON payload
        pub payload: String,
        pub captured_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        /// Belongs to a session
        #[sea_orm(
            belongs_to = "super::sessions::Entity",
            from = "Column::SessionId",
            to = "super::sessions::Column::Id"
        )]
        Session,
    }

    impl Related<super::sessions::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Session.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Terminal lines table entity model.
pub mod terminal_lines {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "terminal_lines")]
    pub struct Model {
        /// Auto-increment row id, gives insertion order
        #[sea_orm(primary_key)]
        pub seq: i32,
        #[sea_orm(unique)]
        pub id: String,
        pub session_id: Option<String>,
        pub level: String,
        pub message: String,
        pub logged_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
