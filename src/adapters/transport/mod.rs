use crate::domain::message::{Delivery, Message};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod log;
pub mod timeout;

pub use log::LogTransport;
pub use timeout::TimeoutTransport;

/// What the transport needs to hand a message to its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message_id: Uuid,
    pub recipient_address: String,
    pub recipient_name: String,
    pub sender_address: String,
    pub sender_name: String,
    pub subject: String,
    pub body: String,
}

impl From<&Message> for Envelope {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            recipient_address: message.recipient.address.clone(),
            recipient_name: message.recipient.name.clone(),
            sender_address: message.sender.address.clone(),
            sender_name: message.sender.name.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth trying again later (network errors, throttling, provider outages).
    Retryable,
    /// Retrying cannot help (malformed or rejected address, content refused).
    Permanent,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
    pub code: Option<String>,
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Retryable, message: message.into(), code: None }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Permanent, message: message.into(), code: None }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.kind, FailureKind::Permanent)
    }
}

#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Hands the message to the provider.
    ///
    /// # Errors
    /// Returns a `TransportError` classified as retryable or permanent.
    async fn deliver(&self, envelope: &Envelope) -> Result<Delivery, TransportError>;
}
