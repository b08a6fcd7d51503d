//! Error types shared across subsystems.

pub mod types;
