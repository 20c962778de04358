// External message egress: SMS gateway and SMTP email.
//
// The automation engine only sees these through the sender traits; wire
// formats and provider auth stay behind the implementations.

pub mod email;
pub mod sms;

pub use email::SmtpMailer;
pub use sms::SmsGateway;

use async_trait::async_trait;
use thiserror::Error;

/// A downstream send was rejected or could not be delivered to the provider.
#[derive(Error, Debug)]
#[error("{provider} send failed: {message}")]
pub struct SendError {
    pub provider: &'static str,
    pub message: String,
}

impl SendError {
    pub fn new(provider: &'static str, message: impl Into<String>) -> Self {
        Self {
            provider,
            message: message.into(),
        }
    }
}

/// Outbound SMS collaborator.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), SendError>;
}

/// Outbound email collaborator.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError>;
}
