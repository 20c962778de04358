// Inbound Messaging
//
// Provider webhooks deliver at least once; this module makes their effects
// happen at most once. Deduplication is keyed by the provider-assigned
// external id, and conversation aggregates only advance on genuinely new
// inbound events.

pub mod store;
pub mod webhook;

pub use store::{MemoryMessageStore, MessageStore, PgMessageStore};
pub use webhook::{InboundProcessor, ProviderWebhook, WebhookOutcome};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type MessagingResult<T> = Result<T, MessagingError>;
