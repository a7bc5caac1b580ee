use crate::adapters::database::DbPool;
use crate::adapters::database::records::MessageRecord;
use crate::domain::message::{Delivery, Message, MessageStatus, NewMessage};
use crate::domain::store::{FailureUpdate, MessageStore};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

macro_rules! returning {
    () => {
        " RETURNING id, subject, body, recipient_address, recipient_name, recipient_contact_id, sender_user_id, \
         sender_address, sender_name, status, scheduled_date, sent_date, retry_count, max_retries, \
         last_error_message, last_error_code, last_error_at, provider_message_id, provider_thread_id, is_active, \
         created_at, updated_at"
    };
}

macro_rules! select_messages {
    () => {
        "SELECT id, subject, body, recipient_address, recipient_name, recipient_contact_id, sender_user_id, \
         sender_address, sender_name, status, scheduled_date, sent_date, retry_count, max_retries, \
         last_error_message, last_error_code, last_error_at, provider_message_id, provider_thread_id, is_active, \
         created_at, updated_at FROM scheduled_messages"
    };
}

fn status_names(statuses: &[MessageStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

fn into_message(record: Option<MessageRecord>) -> Result<Option<Message>> {
    Ok(record.map(Message::try_from).transpose()?)
}

/// Postgres-backed store. Conditional transitions are single `UPDATE ... WHERE status = ANY(..)`
/// statements, so row-level locking arbitrates racing claims.
#[derive(Clone, Debug)]
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, new), err)]
    async fn create(&self, new: NewMessage) -> Result<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            INSERT INTO scheduled_messages (
                id, subject, body, recipient_address, recipient_name, recipient_contact_id,
                sender_user_id, sender_address, sender_name, max_retries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            returning!()
        ))
        .bind(Uuid::now_v7())
        .bind(new.subject)
        .bind(new.body)
        .bind(new.recipient.address)
        .bind(new.recipient.name)
        .bind(new.recipient.contact_id)
        .bind(new.sender.user_id)
        .bind(new.sender.address)
        .bind(new.sender.name)
        .bind(new.max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message::try_from(record)?)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(select_messages!(), " WHERE id = $1 AND is_active"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self, subject, body), err)]
    async fn update_content(&self, id: Uuid, subject: String, body: String) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET subject = $2, body = $3, updated_at = NOW()
            WHERE id = $1 AND is_active AND status IN ('draft', 'scheduled')",
            returning!()
        ))
        .bind(id)
        .bind(subject)
        .bind(body)
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn find_due_for_dispatch(&self, now: OffsetDateTime, limit: i64) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(concat!(
            select_messages!(),
            r"
            WHERE status = 'scheduled'
              AND is_active
              AND scheduled_date <= $1
            ORDER BY scheduled_date ASC, id ASC
            LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Message::try_from).collect::<std::result::Result<Vec<_>, sqlx::Error>>()?)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn count_by_status(&self, sender_id: Option<Uuid>) -> Result<BTreeMap<MessageStatus, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r"
            SELECT status, COUNT(*)
            FROM scheduled_messages
            WHERE is_active
              AND ($1::uuid IS NULL OR sender_user_id = $1)
            GROUP BY status
            ",
        )
        .bind(sender_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = BTreeMap::new();
        for (status, count) in rows {
            let status: MessageStatus = status.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn claim(&self, id: Uuid, from: &[MessageStatus]) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET status = 'sending', updated_at = NOW()
            WHERE id = $1 AND is_active AND status = ANY($2)",
            returning!()
        ))
        .bind(id)
        .bind(status_names(from))
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn claim_due(&self, id: Uuid, now: OffsetDateTime) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET status = 'sending', updated_at = NOW()
            WHERE id = $1 AND is_active AND status = 'scheduled' AND scheduled_date <= $2",
            returning!()
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self, delivery), err)]
    async fn mark_sent(&self, id: Uuid, sent_at: OffsetDateTime, delivery: &Delivery) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET status = 'sent',
                sent_date = $2,
                provider_message_id = $3,
                provider_thread_id = $4,
                updated_at = NOW()
            WHERE id = $1 AND is_active AND status = 'sending'",
            returning!()
        ))
        .bind(id)
        .bind(sent_at)
        .bind(&delivery.provider_message_id)
        .bind(&delivery.provider_thread_id)
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self, update), err)]
    async fn record_failure(&self, id: Uuid, update: &FailureUpdate) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET status = $2,
                retry_count = $3,
                last_error_message = $4,
                last_error_code = $5,
                last_error_at = $6,
                scheduled_date = COALESCE($7, scheduled_date),
                updated_at = NOW()
            WHERE id = $1 AND is_active AND status = 'sending'",
            returning!()
        ))
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.retry_count)
        .bind(&update.last_error.message)
        .bind(&update.last_error.code)
        .bind(update.last_error.timestamp)
        .bind(update.scheduled_date)
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn schedule(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET status = 'scheduled', scheduled_date = $2, updated_at = NOW()
            WHERE id = $1 AND is_active AND status IN ('draft', 'scheduled')",
            returning!()
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn cancel(&self, id: Uuid) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(concat!(
            r"
            UPDATE scheduled_messages
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND is_active AND status = 'scheduled'",
            returning!()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        into_message(record)
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn soft_delete_terminal_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE scheduled_messages
            SET is_active = FALSE, updated_at = NOW()
            WHERE is_active
              AND status = ANY($1)
              AND updated_at < $2
            ",
        )
        .bind(status_names(&MessageStatus::TERMINAL))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn release_stale_claims(&self, claimed_before: OffsetDateTime, now: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE scheduled_messages
            SET status = 'scheduled', scheduled_date = $2, updated_at = $2
            WHERE is_active
              AND status = 'sending'
              AND updated_at < $1
            ",
        )
        .bind(claimed_before)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
