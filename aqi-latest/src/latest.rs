use crate::aqi::flatten;
use crate::state::AppState;
use crate::store::StoreError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Body returned for any store failure; the cause is only logged.
const QUERY_FAILED: &str = "Failed to query data";

fn query_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": QUERY_FAILED })),
    )
        .into_response()
}

pub async fn latest_handler(State(state): State<Arc<AppState>>) -> Response {
    let query = state.params.latest_query();
    debug!(%query, "Received latest request");

    // Bound concurrent store queries
    let _permit = match state.semaphore.acquire().await {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to acquire store permit: {}", e);
            return query_failed();
        }
    };

    let result = tokio::time::timeout(state.query_timeout, state.store.query(&state.org, &query))
        .await
        .unwrap_or_else(|_| Err(StoreError::Timeout(state.query_timeout)));
    let tables = match result {
        Ok(t) => t,
        Err(e) => {
            error!("Store query failed: {}", e);
            return query_failed();
        }
    };

    let records = flatten(&tables);
    info!(
        "Returning {} record(s) from {} table(s)",
        records.len(),
        tables.len()
    );
    (StatusCode::OK, Json(records)).into_response()
}
