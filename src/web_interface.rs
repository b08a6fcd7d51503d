//! HTTP and WebSocket surface.
//!
//! - `routes`: JSON API under `/api`, write routes gated by `x-api-key`.
//! - `ws`: the `/ws` endpoint dashboard clients subscribe through.
//! - `assets`: the embedded dashboard page.
//! - `web_server`: composes the above and owns the listener.

pub mod assets;
pub mod routes;
pub mod types;
pub mod web_server;
pub mod ws;

pub use routes::{api_routes, handle_rejection, ApiContext};
pub use web_server::WebServer;
pub use ws::ws_route;
