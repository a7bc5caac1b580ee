use crate::domain::message::{LastError, Message, MessageStatus, Recipient, Sender};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) subject: String,
    pub(crate) body: String,
    pub(crate) recipient_address: String,
    pub(crate) recipient_name: String,
    pub(crate) recipient_contact_id: Option<Uuid>,
    pub(crate) sender_user_id: Uuid,
    pub(crate) sender_address: String,
    pub(crate) sender_name: String,
    pub(crate) status: String,
    pub(crate) scheduled_date: Option<OffsetDateTime>,
    pub(crate) sent_date: Option<OffsetDateTime>,
    pub(crate) retry_count: i32,
    pub(crate) max_retries: i32,
    pub(crate) last_error_message: Option<String>,
    pub(crate) last_error_code: Option<String>,
    pub(crate) last_error_at: Option<OffsetDateTime>,
    pub(crate) provider_message_id: Option<String>,
    pub(crate) provider_thread_id: Option<String>,
    pub(crate) is_active: bool,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = sqlx::Error;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let status: MessageStatus = record.status.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let last_error = match (record.last_error_message, record.last_error_at) {
            (Some(message), Some(timestamp)) => Some(LastError { message, code: record.last_error_code, timestamp }),
            _ => None,
        };

        Ok(Self {
            id: record.id,
            subject: record.subject,
            body: record.body,
            recipient: Recipient {
                address: record.recipient_address,
                name: record.recipient_name,
                contact_id: record.recipient_contact_id,
            },
            sender: Sender {
                user_id: record.sender_user_id,
                address: record.sender_address,
                name: record.sender_name,
            },
            status,
            scheduled_date: record.scheduled_date,
            sent_date: record.sent_date,
            retry_count: record.retry_count,
            max_retries: record.max_retries,
            last_error,
            provider_message_id: record.provider_message_id,
            provider_thread_id: record.provider_thread_id,
            is_active: record.is_active,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
