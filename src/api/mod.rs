//! HTTP handlers
//!
//! The webhook endpoint plus read-only views over triggers and builds.

pub mod builds;
pub mod config;
pub mod stats;
pub mod stream;
pub mod triggers;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use builds::{get_build, get_builds};
pub use config::{get_config, reload_config_endpoint};
pub use stats::status;
pub use stream::stream_builds;
pub use triggers::get_triggers;
pub use webhook::handle_webhook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/api/builds", routing::get(get_builds))
        .route("/api/builds/{id}", routing::get(get_build))
        .route("/api/triggers", routing::get(get_triggers))
        .route("/api/config", routing::get(get_config))
        .route("/api/reload", routing::post(reload_config_endpoint))
        .route("/api/stream/builds", routing::get(stream_builds))
        .with_state(state)
}
