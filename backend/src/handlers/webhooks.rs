use axum::{extract::State, http::StatusCode, routing::post, Router};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::messaging::ProviderWebhook;
use crate::AppState;

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/messages", post(receive_message))
}

/// Provider push endpoint.
///
/// The provider is acknowledged immediately, before any processing runs; a
/// slow or failing pipeline must never cause provider-side retry storms.
/// Parse and processing failures are logged, never returned.
async fn receive_message(State(state): State<Arc<AppState>>, body: String) -> StatusCode {
    tokio::spawn(async move {
        let payload = match serde_json::from_str::<ProviderWebhook>(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "unparseable provider webhook");
                return;
            }
        };

        let external_id = payload.id.clone();
        match state.inbound.process(payload).await {
            Ok(outcome) => {
                debug!(external_id = %external_id, outcome = ?outcome, "webhook processed")
            }
            Err(e) => warn!(external_id = %external_id, error = %e, "webhook processing failed"),
        }
    });

    StatusCode::OK
}
