use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info};

use super::{SendError, SmsSender};
use crate::config::SmsConfig;

/// HTTP JSON SMS gateway client.
///
/// Posts `{from, to, text}` to the configured provider endpoint with bearer
/// auth; any non-2xx response is a send failure.
#[derive(Debug, Clone)]
pub struct SmsGateway {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    from_number: String,
}

impl SmsGateway {
    pub fn new(config: &SmsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
            from_number: config.from_number.clone(),
        }
    }
}

#[async_trait]
impl SmsSender for SmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<(), SendError> {
        let payload = serde_json::json!({
            "from": self.from_number,
            "to": to,
            "text": body,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::new("sms", e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!("SMS queued for {}", to);
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            error!("SMS gateway rejected message to {}: {} {}", to, status, detail);
            Err(SendError::new(
                "sms",
                format!("gateway returned {}: {}", status, detail),
            ))
        }
    }
}
