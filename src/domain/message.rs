use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    /// The transport rejected the message permanently.
    Failed,
    /// Every automatic retry was used up.
    Exhausted,
    Cancelled,
}

impl MessageStatus {
    pub const ALL: [Self; 7] =
        [Self::Draft, Self::Scheduled, Self::Sending, Self::Sent, Self::Failed, Self::Exhausted, Self::Cancelled];

    pub const TERMINAL: [Self; 4] = [Self::Sent, Self::Failed, Self::Exhausted, Self::Cancelled];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Exhausted | Self::Cancelled)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown message status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|status| status.as_str() == s).ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub address: String,
    #[serde(default)]
    pub name: String,
    /// Contact entity owned by the CRM, if the recipient is a known contact.
    #[serde(default)]
    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub user_id: Uuid,
    pub address: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Identifiers handed back by the transport for an accepted message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub provider_message_id: String,
    pub provider_thread_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub subject: String,
    pub body: String,
    pub recipient: Recipient,
    pub sender: Sender,
    pub max_retries: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub subject: String,
    pub body: String,
    pub recipient: Recipient,
    pub sender: Sender,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scheduled_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_date: Option<OffsetDateTime>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<LastError>,
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub fn draft(new: NewMessage, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            subject: new.subject,
            body: new.body,
            recipient: new.recipient,
            sender: new.sender,
            status: MessageStatus::Draft,
            scheduled_date: None,
            sent_date: None,
            retry_count: 0,
            max_retries: new.max_retries,
            last_error: None,
            provider_message_id: None,
            provider_thread_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_due_at(&self, now: OffsetDateTime) -> bool {
        self.is_active
            && self.status == MessageStatus::Scheduled
            && self.scheduled_date.is_some_and(|scheduled| scheduled <= now)
    }

    #[must_use]
    pub const fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
