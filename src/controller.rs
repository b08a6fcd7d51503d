//! Process orchestration: builds every subsystem from the configuration and
//! drives the background loops and the web server until shutdown.

pub mod controller_handler;

pub use controller_handler::Controller;
