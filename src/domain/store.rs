use crate::domain::message::{Delivery, LastError, Message, MessageStatus, NewMessage};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Fields written together when a delivery attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    pub last_error: LastError,
    pub retry_count: i32,
    pub status: MessageStatus,
    /// Next attempt time; only set when the message goes back to `scheduled`.
    pub scheduled_date: Option<OffsetDateTime>,
}

/// Durable storage for messages.
///
/// Every mutation touches a single record. Conditional transitions return `None` when the record
/// is missing, soft-deleted or not in one of the expected statuses, and must be atomic with
/// respect to concurrent callers: two racing `claim` calls never both succeed.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Cheap connectivity check used by readiness probes.
    async fn ping(&self) -> Result<()>;

    async fn create(&self, new: NewMessage) -> Result<Message>;

    async fn get(&self, id: Uuid) -> Result<Option<Message>>;

    /// Replaces subject and body of a message that has not been claimed yet.
    async fn update_content(&self, id: Uuid, subject: String, body: String) -> Result<Option<Message>>;

    /// Active `scheduled` messages with `scheduled_date <= now`, oldest first.
    async fn find_due_for_dispatch(&self, now: OffsetDateTime, limit: i64) -> Result<Vec<Message>>;

    async fn count_by_status(&self, sender_id: Option<Uuid>) -> Result<BTreeMap<MessageStatus, i64>>;

    /// Moves the message to `sending` if its current status is one of `from`.
    async fn claim(&self, id: Uuid, from: &[MessageStatus]) -> Result<Option<Message>>;

    /// Moves a `scheduled` message to `sending` only if its `scheduled_date` is at or before `now`.
    async fn claim_due(&self, id: Uuid, now: OffsetDateTime) -> Result<Option<Message>>;

    /// Sets `sent` and `sent_date` together. Requires `sending`.
    async fn mark_sent(&self, id: Uuid, sent_at: OffsetDateTime, delivery: &Delivery) -> Result<Option<Message>>;

    /// Requires `sending`.
    async fn record_failure(&self, id: Uuid, update: &FailureUpdate) -> Result<Option<Message>>;

    /// Requires `draft` or `scheduled`.
    async fn schedule(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Message>>;

    /// Requires `scheduled`.
    async fn cancel(&self, id: Uuid) -> Result<Option<Message>>;

    /// Soft-deletes terminal messages last touched before `cutoff`.
    async fn soft_delete_terminal_before(&self, cutoff: OffsetDateTime) -> Result<u64>;

    /// Returns messages stuck in `sending` since before `claimed_before` to the queue, due at `now`.
    async fn release_stale_claims(&self, claimed_before: OffsetDateTime, now: OffsetDateTime) -> Result<u64>;
}
