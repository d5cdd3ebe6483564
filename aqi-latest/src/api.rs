pub use crate::latest::latest_handler;

use crate::state::AppState;
use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub async fn health_handler() -> impl IntoResponse {
    // Readiness only; never touches the store.
    Json(json!({ "status": "ok" }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_allow_any = state.cors_allow_any;
    let mut app: Router = Router::new()
        .route("/latest", get(latest_handler))
        .route("/health", get(health_handler))
        .with_state(state);
    if cors_allow_any {
        app = app.layer(CorsLayer::permissive());
    }
    app.layer(TraceLayer::new_for_http())
}
