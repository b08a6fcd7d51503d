//! Storage subsystem
//!
//! Persists sessions, intelligence captures and terminal lines. Every state
//! transition of the session manager is committed here before its domain
//! event is emitted.
//!
//! Components:
//! - `storage_trait`: the async `Storage` trait every backend implements.
//! - `types` / `session_filter`: query criteria for listing sessions.
//! - `memory_storage`: process-local backend, nothing survives a restart.
//! - `file_storage`: JSON documents in a directory tree.
//! - `database_storage`: SQLite through SeaORM.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod memory_storage;
pub mod session_filter;
pub mod storage_trait;
pub mod types;

pub use storage_trait::Storage;
pub use types::SessionFilter;
