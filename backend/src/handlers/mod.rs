pub mod automations;
pub mod webhooks;

pub use automations::automation_routes;
pub use webhooks::webhook_routes;

use axum::{extract::State, response::Json};
use std::sync::Arc;

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let database = crate::database::health_check(&state.db_pool).await;

    Json(serde_json::json!({
        "status": if database { "healthy" } else { "degraded" },
        "database": database,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
