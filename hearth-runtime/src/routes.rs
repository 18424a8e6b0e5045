use crate::AppState;

use axum::{Json, extract::State, response::IntoResponse};
use axum_macros::debug_handler;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    tick: u64,
    online: usize,
    cached_records: usize,
    store_reads: u64,
}

#[debug_handler]
pub(crate) async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        tick: state.stats.tick(),
        online: state.stats.online(),
        cached_records: state.cache.len(),
        store_reads: state.cache.store_reads(),
    })
}
