// Message Store - deduplicated message log and conversation aggregates
//
// insert_message is the dedup gate: the external id is unique, racing
// inserts of the same delivery collapse to one row, and only the insert
// that actually lands may touch conversation state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use fieldhub_shared::{Conversation, ConversationStatus, DeliveryStatus, MessageRecord, MessageDirection};

use super::MessagingResult;

/// Persistence port for inbound message events and conversations.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn find_message(&self, external_id: &str) -> MessagingResult<Option<MessageRecord>>;

    /// Insert if the external id is new. Returns false on a duplicate;
    /// duplicates must have no further side effects.
    async fn insert_message(&self, message: &MessageRecord) -> MessagingResult<bool>;

    async fn find_conversation_by_counterparty(
        &self,
        counterparty: &str,
    ) -> MessagingResult<Option<Conversation>>;
    async fn get_conversation(&self, id: Uuid) -> MessagingResult<Option<Conversation>>;

    /// Advance last_message_at/preview and increment the unread count.
    async fn record_inbound(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
        preview: &str,
    ) -> MessagingResult<()>;

    /// Mark the conversation stopped (counterparty opt-out).
    async fn stop_conversation(&self, conversation_id: Uuid) -> MessagingResult<()>;

    async fn record_opt_out(
        &self,
        counterparty: &str,
        keyword: &str,
        message_external_id: &str,
    ) -> MessagingResult<()>;

    /// Delivery-receipt update for an outbound message, keyed by the same
    /// external id. Unknown ids are a no-op and return false.
    async fn update_delivery_status(
        &self,
        external_id: &str,
        status: DeliveryStatus,
    ) -> MessagingResult<bool>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<HashMap<String, MessageRecord>>,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    opt_outs: RwLock<Vec<(String, String, String)>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a conversation (tests / local development).
    pub async fn insert_conversation(&self, conversation: Conversation) {
        self.conversations
            .write()
            .await
            .insert(conversation.id, conversation);
    }

    pub async fn opt_out_count(&self) -> usize {
        self.opt_outs.read().await.len()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_message(&self, external_id: &str) -> MessagingResult<Option<MessageRecord>> {
        Ok(self.messages.read().await.get(external_id).cloned())
    }

    async fn insert_message(&self, message: &MessageRecord) -> MessagingResult<bool> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.external_id) {
            return Ok(false);
        }
        messages.insert(message.external_id.clone(), message.clone());
        Ok(true)
    }

    async fn find_conversation_by_counterparty(
        &self,
        counterparty: &str,
    ) -> MessagingResult<Option<Conversation>> {
        Ok(self
            .conversations
            .read()
            .await
            .values()
            .find(|c| c.counterparty == counterparty)
            .cloned())
    }

    async fn get_conversation(&self, id: Uuid) -> MessagingResult<Option<Conversation>> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn record_inbound(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
        preview: &str,
    ) -> MessagingResult<()> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(&conversation_id) {
            conversation.last_message_at = Some(at);
            conversation.last_message_preview = Some(preview.to_string());
            conversation.unread_count += 1;
        }
        Ok(())
    }

    async fn stop_conversation(&self, conversation_id: Uuid) -> MessagingResult<()> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(&conversation_id) {
            conversation.status = ConversationStatus::Stopped;
        }
        Ok(())
    }

    async fn record_opt_out(
        &self,
        counterparty: &str,
        keyword: &str,
        message_external_id: &str,
    ) -> MessagingResult<()> {
        self.opt_outs.write().await.push((
            counterparty.to_string(),
            keyword.to_string(),
            message_external_id.to_string(),
        ));
        Ok(())
    }

    async fn update_delivery_status(
        &self,
        external_id: &str,
        status: DeliveryStatus,
    ) -> MessagingResult<bool> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(external_id) {
            Some(message) if message.direction == MessageDirection::Outbound => {
                message.delivery_status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

type MessageRow = (
    Uuid,                  // id
    String,                // external_id
    Option<Uuid>,          // conversation_id
    String,                // direction
    String,                // from_address
    String,                // to_address
    String,                // body
    String,                // delivery_status
    DateTime<Utc>,         // created_at
);

type ConversationRow = (
    Uuid,                  // id
    Option<Uuid>,          // client_id
    String,                // counterparty
    String,                // status
    Option<DateTime<Utc>>, // last_message_at
    Option<String>,        // last_message_preview
    i32,                   // unread_count
    DateTime<Utc>,         // created_at
);

const MESSAGE_COLUMNS: &str = "id, external_id, conversation_id, direction, from_address, to_address, body, delivery_status, created_at";
const CONVERSATION_COLUMNS: &str = "id, client_id, counterparty, status, last_message_at, last_message_preview, unread_count, created_at";

/// PostgreSQL-backed message store.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_message_row(row: MessageRow) -> Option<MessageRecord> {
        let direction = match row.3.as_str() {
            "inbound" => MessageDirection::Inbound,
            "outbound" => MessageDirection::Outbound,
            _ => return None,
        };
        let delivery_status = DeliveryStatus::parse(&row.7)?;

        Some(MessageRecord {
            id: row.0,
            external_id: row.1,
            conversation_id: row.2,
            direction,
            from_address: row.4,
            to_address: row.5,
            body: row.6,
            delivery_status,
            created_at: row.8,
        })
    }

    fn map_conversation_row(row: ConversationRow) -> Option<Conversation> {
        let status = match row.3.as_str() {
            "active" => ConversationStatus::Active,
            "stopped" => ConversationStatus::Stopped,
            "archived" => ConversationStatus::Archived,
            _ => return None,
        };

        Some(Conversation {
            id: row.0,
            client_id: row.1,
            counterparty: row.2,
            status,
            last_message_at: row.4,
            last_message_preview: row.5,
            unread_count: row.6,
            created_at: row.7,
        })
    }

    fn direction_str(direction: MessageDirection) -> &'static str {
        match direction {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }

    fn delivery_status_str(status: DeliveryStatus) -> &'static str {
        match status {
            DeliveryStatus::Received => "received",
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_message(&self, external_id: &str) -> MessagingResult<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM messages WHERE external_id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::map_message_row))
    }

    async fn insert_message(&self, message: &MessageRecord) -> MessagingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages
            (id, external_id, conversation_id, direction, from_address, to_address, body, delivery_status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (external_id) DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(&message.external_id)
        .bind(message.conversation_id)
        .bind(Self::direction_str(message.direction))
        .bind(&message.from_address)
        .bind(&message.to_address)
        .bind(&message.body)
        .bind(Self::delivery_status_str(message.delivery_status))
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_conversation_by_counterparty(
        &self,
        counterparty: &str,
    ) -> MessagingResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM conversations WHERE counterparty = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(counterparty)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::map_conversation_row))
    }

    async fn get_conversation(&self, id: Uuid) -> MessagingResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {} FROM conversations WHERE id = $1",
            CONVERSATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::map_conversation_row))
    }

    async fn record_inbound(
        &self,
        conversation_id: Uuid,
        at: DateTime<Utc>,
        preview: &str,
    ) -> MessagingResult<()> {
        sqlx::query(
            "UPDATE conversations \
             SET last_message_at = $2, last_message_preview = $3, unread_count = unread_count + 1 \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(at)
        .bind(preview)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stop_conversation(&self, conversation_id: Uuid) -> MessagingResult<()> {
        sqlx::query("UPDATE conversations SET status = 'stopped' WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_opt_out(
        &self,
        counterparty: &str,
        keyword: &str,
        message_external_id: &str,
    ) -> MessagingResult<()> {
        sqlx::query(
            "INSERT INTO opt_outs (id, counterparty, keyword, message_external_id, created_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(counterparty)
        .bind(keyword)
        .bind(message_external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_delivery_status(
        &self,
        external_id: &str,
        status: DeliveryStatus,
    ) -> MessagingResult<bool> {
        let result = sqlx::query(
            "UPDATE messages SET delivery_status = $2 \
             WHERE external_id = $1 AND direction = 'outbound'",
        )
        .bind(external_id)
        .bind(Self::delivery_status_str(status))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
