pub mod cache;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod helpers;
pub mod identity;
pub mod pipeline;
pub mod playtime;
mod routes;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod validation;
pub mod world;

use axum::{Router, http::StatusCode, routing::get};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use cache::RecordCache;
pub use dispatcher::{Dispatcher, Invoker, Reply};
pub use error::{CacheError, CommandError, ParseError};
pub use pipeline::{JoinOutcome, JoinPipeline};
pub use scheduler::{MainHandle, MainQueue, main_channel};
pub use server::{Server, ServerEvent, ServerHandle, ServerStats};
pub use store::PlayerStore;
pub use world::{Outbound, PlayerHandle, World};

pub struct AppState {
    pub stats: Arc<ServerStats>,
    pub cache: Arc<RecordCache>,
}

/// Create the status router
pub fn create_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/status", get(routes::status))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .with_state(Arc::new(state))
}
