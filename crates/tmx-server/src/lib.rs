//! WebSocket media-processing server.
//!
//! One session per connection: text envelopes carry control messages,
//! binary frames carry uploads in and artifacts out. Jobs run on the
//! in-process [`tmx_jobs::JobManager`] worker pool.

pub mod config;
pub mod health;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use routes::{create_router, health_router};
pub use state::AppState;
