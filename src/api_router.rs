//! Combines the per-module routers into the unified API surface.

use axum::{routing::get, Json, Router};
use std::sync::Arc;

use crate::shared::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Configure all API routes from all modules.
pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        // ===== Ticket intake & categories =====
        .merge(crate::tickets::configure_tickets_routes())
        // ===== Assignment state machine =====
        .merge(crate::tickets::assignment::configure_assignment_routes())
        // ===== Directory =====
        .merge(crate::directory::departments::configure_departments_routes())
        .merge(crate::directory::persons::configure_persons_routes())
        .merge(crate::directory::users::configure_users_routes())
}
