//! HTTP and WebSocket surface of the scan service.

mod api;
mod error;
mod handlers;
mod stats;
mod ws;

pub use api::{ApiServer, ApiServerBuilder, ServerState};
pub use error::ApiError;
pub use stats::{ConnectionSnapshot, ConnectionStats};
