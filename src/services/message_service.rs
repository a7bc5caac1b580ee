use crate::domain::message::{Message, MessageStatus, NewMessage};
use crate::domain::store::MessageStore;
use crate::error::{AppError, Result};
use crate::services::dispatcher::{Claim, DispatchOutcome, Dispatcher, MANUAL_CLAIM};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Message lifecycle operations invoked by hosts and operators.
#[derive(Clone, Debug)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    default_max_retries: i32,
}

impl MessageService {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Dispatcher, default_max_retries: i32) -> Self {
        Self { store, dispatcher, default_max_retries }
    }

    /// Stores a new `draft`. `max_retries` falls back to the configured default.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the recipient or sender address is blank or the retry budget is negative.
    #[tracing::instrument(level = "debug", skip(self, new), fields(sender_id = %new.sender.user_id), err)]
    pub async fn create_draft(&self, mut new: NewMessage, max_retries: Option<i32>) -> Result<Message> {
        if new.recipient.address.trim().is_empty() {
            return Err(AppError::BadRequest("recipient address is required".into()));
        }
        if new.sender.address.trim().is_empty() {
            return Err(AppError::BadRequest("sender address is required".into()));
        }

        new.max_retries = max_retries.unwrap_or(self.default_max_retries);
        if new.max_retries < 0 {
            return Err(AppError::BadRequest("maxRetries must not be negative".into()));
        }

        let message = self.store.create(new).await?;
        tracing::info!(message_id = %message.id, "Draft created");
        Ok(message)
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist or was soft-deleted.
    pub async fn get_message(&self, id: Uuid) -> Result<Message> {
        self.store.get(id).await?.ok_or(AppError::NotFound)
    }

    /// # Errors
    /// Returns `AppError::Conflict` once the message has been claimed or reached a terminal state.
    #[tracing::instrument(level = "debug", skip(self, subject, body), err)]
    pub async fn update_content(&self, id: Uuid, subject: String, body: String) -> Result<Message> {
        match self.store.update_content(id, subject, body).await? {
            Some(message) => Ok(message),
            None => Err(self.rejection(id, "content can only change before sending").await),
        }
    }

    /// Delivers a message immediately, bypassing its schedule.
    ///
    /// Uses the same claim as the scheduler loop, so a concurrent tick cannot send it twice.
    /// Transport failures are recorded on the message exactly as for scheduled sends.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if the message was already sent, `AppError::Conflict` if it is
    /// being sent right now or is otherwise terminal, and `AppError::NotFound` for unknown ids.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn send_now(&self, id: Uuid) -> Result<Message> {
        let message = self.get_message(id).await?;
        if message.status == MessageStatus::Sent {
            return Err(AppError::BadRequest("message has already been sent".into()));
        }
        if !MANUAL_CLAIM.contains(&message.status) {
            return Err(conflict(&message));
        }

        match self.dispatcher.dispatch(id, Claim::Manual).await? {
            DispatchOutcome::Skipped => Err(self.rejection(id, "message is no longer sendable").await),
            outcome => {
                tracing::info!(message_id = %id, outcome = outcome.label(), "Manual send finished");
                outcome.message().cloned().ok_or(AppError::Internal)
            }
        }
    }

    /// Attaches a send time to a `draft` or moves an already scheduled message.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` if `at` is not in the future and `AppError::Conflict` if the
    /// message is neither `draft` nor `scheduled`.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn schedule_email(&self, id: Uuid, at: OffsetDateTime) -> Result<Message> {
        if at <= OffsetDateTime::now_utc() {
            return Err(AppError::BadRequest("scheduled date must be in the future".into()));
        }

        match self.store.schedule(id, at).await? {
            Some(message) => {
                tracing::info!(message_id = %id, scheduled_date = %at, "Message scheduled");
                Ok(message)
            }
            None => Err(self.rejection(id, "only drafts and scheduled messages can be scheduled").await),
        }
    }

    /// # Errors
    /// Returns `AppError::Conflict` if the message is not `scheduled`; nothing is modified in that case.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn cancel_scheduled_email(&self, id: Uuid) -> Result<Message> {
        match self.store.cancel(id).await? {
            Some(message) => {
                tracing::info!(message_id = %id, "Scheduled message cancelled");
                Ok(message)
            }
            None => Err(self.rejection(id, "only scheduled messages can be cancelled").await),
        }
    }

    /// Soft-deletes terminal messages not touched in the last `days_old` days.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` for a negative `days_old`.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn cleanup_old_emails(&self, days_old: i64) -> Result<u64> {
        if days_old < 0 {
            return Err(AppError::BadRequest("daysOld must not be negative".into()));
        }

        let cutoff = OffsetDateTime::now_utc()
            .checked_sub(time::Duration::days(days_old))
            .ok_or_else(|| AppError::BadRequest("daysOld is out of range".into()))?;
        let deleted = self.store.soft_delete_terminal_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!(count = deleted, days_old, "Soft-deleted old messages");
        }
        Ok(deleted)
    }

    /// Requeues messages whose claim is older than `timeout`.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the store fails.
    pub async fn release_stale_claims(&self, timeout: Duration) -> Result<u64> {
        let now = OffsetDateTime::now_utc();
        let claimed_before = time::Duration::try_from(timeout)
            .ok()
            .and_then(|timeout| now.checked_sub(timeout))
            .ok_or(AppError::Internal)?;
        self.store.release_stale_claims(claimed_before, now).await
    }

    /// Explains why a conditional transition matched nothing.
    async fn rejection(&self, id: Uuid, reason: &str) -> AppError {
        match self.store.get(id).await {
            Ok(Some(message)) => {
                tracing::debug!(message_id = %id, status = %message.status, reason, "Transition rejected");
                AppError::Conflict(format!("{reason} (status is {})", message.status))
            }
            Ok(None) => AppError::NotFound,
            Err(e) => e,
        }
    }
}

fn conflict(message: &Message) -> AppError {
    if message.status == MessageStatus::Sending {
        AppError::Conflict("message is being sent".into())
    } else {
        AppError::Conflict(format!("message is {}", message.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryMessageStore;
    use crate::adapters::transport::TransportError;
    use crate::domain::backoff::BackoffPolicy;
    use crate::test_support::{ScriptedTransport, new_message};
    use time::Duration as TimeDuration;

    fn setup(transport: ScriptedTransport) -> (Arc<InMemoryMessageStore>, Arc<ScriptedTransport>, MessageService) {
        crate::telemetry::init_test_telemetry();
        let store = Arc::new(InMemoryMessageStore::new());
        let transport = Arc::new(transport);
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), BackoffPolicy::default());
        let service = MessageService::new(store.clone(), dispatcher, 3);
        (store, transport, service)
    }

    #[tokio::test]
    async fn test_create_draft_applies_default_retry_budget() {
        let (_store, _transport, service) = setup(ScriptedTransport::default());

        let draft = service.create_draft(new_message(Uuid::new_v4(), 0), None).await.unwrap();
        assert_eq!(draft.status, MessageStatus::Draft);
        assert_eq!(draft.max_retries, 3);

        let custom = service.create_draft(new_message(Uuid::new_v4(), 0), Some(5)).await.unwrap();
        assert_eq!(custom.max_retries, 5);
    }

    #[tokio::test]
    async fn test_create_draft_validates_input() {
        let (_store, _transport, service) = setup(ScriptedTransport::default());

        let mut blank = new_message(Uuid::new_v4(), 3);
        blank.recipient.address = "  ".into();
        assert!(matches!(service.create_draft(blank, None).await, Err(AppError::BadRequest(_))));

        let negative = service.create_draft(new_message(Uuid::new_v4(), 3), Some(-1)).await;
        assert!(matches!(negative, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_send_now_delivers_draft_without_scheduling_it() {
        let (_store, transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();

        let sent = service.send_now(draft.id).await.unwrap();

        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.sent_date.is_some());
        assert!(sent.scheduled_date.is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_send_now_rejects_sent_and_terminal_messages() {
        let (store, transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        service.send_now(draft.id).await.unwrap();

        assert!(matches!(service.send_now(draft.id).await, Err(AppError::BadRequest(_))));

        let other = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        service.schedule_email(other.id, OffsetDateTime::now_utc() + TimeDuration::hours(1)).await.unwrap();
        service.cancel_scheduled_email(other.id).await.unwrap();
        assert!(matches!(service.send_now(other.id).await, Err(AppError::Conflict(_))));

        let claimed = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        store.claim(claimed.id, MANUAL_CLAIM).await.unwrap();
        assert!(matches!(service.send_now(claimed.id).await, Err(AppError::Conflict(_))));

        assert!(matches!(service.send_now(Uuid::new_v4()).await, Err(AppError::NotFound)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_send_now_records_transport_failure() {
        let (_store, _transport, service) =
            setup(ScriptedTransport::with_results(vec![Err(TransportError::retryable("rate limited"))]));
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();

        let updated = service.send_now(draft.id).await.unwrap();

        assert_eq!(updated.status, MessageStatus::Scheduled);
        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.last_error.unwrap().message, "rate limited");
    }

    #[tokio::test]
    async fn test_schedule_email_requires_future_date() {
        let (store, _transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();

        let past = service.schedule_email(draft.id, OffsetDateTime::now_utc() - TimeDuration::seconds(1)).await;
        assert!(matches!(past, Err(AppError::BadRequest(_))));
        assert_eq!(store.get(draft.id).await.unwrap().unwrap().status, MessageStatus::Draft);

        let at = OffsetDateTime::now_utc() + TimeDuration::minutes(10);
        let scheduled = service.schedule_email(draft.id, at).await.unwrap();
        assert_eq!(scheduled.status, MessageStatus::Scheduled);
        assert_eq!(scheduled.scheduled_date, Some(at));

        let later = at + TimeDuration::minutes(10);
        assert_eq!(service.schedule_email(draft.id, later).await.unwrap().scheduled_date, Some(later));
    }

    #[tokio::test]
    async fn test_schedule_email_rejects_sent_message() {
        let (_store, _transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        service.send_now(draft.id).await.unwrap();

        let result = service.schedule_email(draft.id, OffsetDateTime::now_utc() + TimeDuration::hours(1)).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cancel_only_applies_to_scheduled_messages() {
        let (store, _transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();

        let before = store.get(draft.id).await.unwrap().unwrap();
        assert!(matches!(service.cancel_scheduled_email(draft.id).await, Err(AppError::Conflict(_))));
        assert_eq!(store.get(draft.id).await.unwrap().unwrap(), before);

        service.schedule_email(draft.id, OffsetDateTime::now_utc() + TimeDuration::hours(1)).await.unwrap();
        let cancelled = service.cancel_scheduled_email(draft.id).await.unwrap();
        assert_eq!(cancelled.status, MessageStatus::Cancelled);

        assert!(matches!(service.cancel_scheduled_email(Uuid::new_v4()).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_content_before_send_only() {
        let (_store, _transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();

        let updated = service.update_content(draft.id, "New subject".into(), "New body".into()).await.unwrap();
        assert_eq!(updated.subject, "New subject");

        service.send_now(draft.id).await.unwrap();
        let result = service.update_content(draft.id, "Too late".into(), String::new()).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_cleanup_old_emails() {
        let (store, _transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        let sent = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        service.send_now(sent.id).await.unwrap();

        assert!(matches!(service.cleanup_old_emails(-1).await, Err(AppError::BadRequest(_))));
        assert_eq!(service.cleanup_old_emails(30).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(service.cleanup_old_emails(0).await.unwrap(), 1);
        assert!(store.get(sent.id).await.unwrap().is_none());
        assert!(store.get(draft.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_stale_claims_requeues_abandoned_sends() {
        let (store, _transport, service) = setup(ScriptedTransport::default());
        let draft = service.create_draft(new_message(Uuid::new_v4(), 3), None).await.unwrap();
        store.claim(draft.id, MANUAL_CLAIM).await.unwrap();

        assert_eq!(service.release_stale_claims(Duration::from_secs(900)).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(service.release_stale_claims(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.get(draft.id).await.unwrap().unwrap().status, MessageStatus::Scheduled);
    }
}
