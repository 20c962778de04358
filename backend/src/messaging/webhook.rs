// Inbound Webhook Deduplication
//
// Providers deliver webhooks at least once. Processing here must therefore
// be idempotent per external id: the first delivery stores the message and
// updates conversation state, every redelivery is a no-op. The HTTP layer
// acknowledges before any of this runs (see handlers::webhooks).

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fieldhub_shared::{DeliveryStatus, MessageDirection, MessageRecord};
use serde::{Deserialize, Serialize};

use super::store::MessageStore;
use super::MessagingResult;

/// Keywords that opt a counterparty out of further messaging. Matched
/// exactly (trimmed, case-insensitive) against the whole message body.
pub const OPT_OUT_KEYWORDS: &[&str] = &["stop", "stopall", "unsubscribe", "cancel", "end", "quit"];

/// Conversation preview keeps the first 160 characters of the body.
pub const PREVIEW_MAX_CHARS: usize = 160;

/// Provider push payload for inbound messages and delivery receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderWebhook {
    /// "message" for inbound messages, "status" for delivery receipts.
    pub record_type: String,
    #[serde(default)]
    pub direction: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Provider-assigned message id; the dedup key.
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// What processing did with one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// External id already seen; nothing changed.
    Duplicate,
    /// New message, conversation advanced.
    ConversationUpdated,
    /// New message matched an opt-out keyword; conversation stopped.
    OptedOut,
    /// New message stored, but no conversation exists for the sender.
    StoredUnlinked,
    /// Delivery receipt applied to an outbound message.
    StatusUpdated,
    /// Receipt for an unknown message or unknown status value.
    StatusIgnored,
    /// Unrecognized record type.
    Ignored,
}

#[derive(Clone)]
pub struct InboundProcessor {
    store: Arc<dyn MessageStore>,
}

impl InboundProcessor {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    pub async fn process(&self, payload: ProviderWebhook) -> MessagingResult<WebhookOutcome> {
        if payload.record_type == "message" {
            self.process_inbound(payload).await
        } else if payload.record_type == "status" {
            self.process_receipt(payload).await
        } else {
            warn!(record_type = %payload.record_type, "unrecognized webhook record type");
            Ok(WebhookOutcome::Ignored)
        }
    }

    async fn process_inbound(&self, payload: ProviderWebhook) -> MessagingResult<WebhookOutcome> {
        if self.store.find_message(&payload.id).await?.is_some() {
            debug!(external_id = %payload.id, "duplicate webhook delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let body = payload.text.unwrap_or_default();
        let conversation = self
            .store
            .find_conversation_by_counterparty(&payload.from)
            .await?;

        let message = MessageRecord {
            id: Uuid::new_v4(),
            external_id: payload.id,
            conversation_id: conversation.as_ref().map(|c| c.id),
            direction: MessageDirection::Inbound,
            from_address: payload.from,
            to_address: payload.to,
            body: body.clone(),
            delivery_status: DeliveryStatus::Received,
            created_at: Utc::now(),
        };

        // The insert is the dedup gate; losing the race means another
        // delivery of the same id already did the work
        if !self.store.insert_message(&message).await? {
            debug!(external_id = %message.external_id, "lost insert race to a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }

        let Some(conversation) = conversation else {
            // No conversation is fabricated for unknown senders
            info!(from = %message.from_address, "inbound message stored without conversation");
            return Ok(WebhookOutcome::StoredUnlinked);
        };

        if let Some(keyword) = opt_out_keyword(&body) {
            self.store.stop_conversation(conversation.id).await?;
            self.store
                .record_opt_out(&conversation.counterparty, keyword, &message.external_id)
                .await?;
            info!(
                conversation = %conversation.id,
                keyword = keyword,
                "counterparty opted out"
            );
            return Ok(WebhookOutcome::OptedOut);
        }

        self.store
            .record_inbound(conversation.id, message.created_at, &preview(&body))
            .await?;
        Ok(WebhookOutcome::ConversationUpdated)
    }

    async fn process_receipt(&self, payload: ProviderWebhook) -> MessagingResult<WebhookOutcome> {
        let Some(status) = payload.status.as_deref().and_then(DeliveryStatus::parse) else {
            warn!(external_id = %payload.id, status = ?payload.status, "unparseable delivery status");
            return Ok(WebhookOutcome::StatusIgnored);
        };

        if self.store.update_delivery_status(&payload.id, status).await? {
            Ok(WebhookOutcome::StatusUpdated)
        } else {
            debug!(external_id = %payload.id, "receipt for unknown outbound message");
            Ok(WebhookOutcome::StatusIgnored)
        }
    }
}

fn opt_out_keyword(body: &str) -> Option<&'static str> {
    let normalized = body.trim().to_lowercase();
    OPT_OUT_KEYWORDS
        .iter()
        .find(|keyword| **keyword == normalized)
        .copied()
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_MAX_CHARS).collect()
}
