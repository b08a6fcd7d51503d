pub mod broadcast;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod session_management;
pub mod stats;
pub mod storage;
pub mod web_interface;
