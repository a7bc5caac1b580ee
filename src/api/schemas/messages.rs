use crate::domain::message::{NewMessage, Recipient, Sender};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub subject: String,
    pub body: String,
    pub recipient: Recipient,
    pub sender: Sender,
    pub max_retries: Option<i32>,
}

impl CreateMessage {
    /// Splits the payload into the new message and its optional retry budget override.
    #[must_use]
    pub fn into_parts(self) -> (NewMessage, Option<i32>) {
        let new = NewMessage {
            subject: self.subject,
            body: self.body,
            recipient: self.recipient,
            sender: self.sender,
            max_retries: 0,
        };
        (new, self.max_retries)
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateContent {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMessage {
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_date: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub sender_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cleanup {
    pub days_old: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted: u64,
}
