use crate::adapters::transport::{Envelope, Transport, TransportError};
use crate::domain::backoff::BackoffPolicy;
use crate::domain::message::{Delivery, LastError, Message, MessageStatus};
use crate::domain::store::{FailureUpdate, MessageStore};
use crate::error::{AppError, Result};
use backon::{ExponentialBuilder, Retryable};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Statuses a manual "send now" may claim from.
pub const MANUAL_CLAIM: &[MessageStatus] = &[MessageStatus::Draft, MessageStatus::Scheduled];

/// How the dispatcher takes ownership of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Scheduler path: `scheduled` and due at or before the given instant.
    DueBy(OffsetDateTime),
    /// Manual trigger: any status in [`MANUAL_CLAIM`], whatever the schedule says.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(Message),
    /// Retryable failure; the message is back in the queue.
    Rescheduled(Message),
    /// Permanent failure.
    Failed(Message),
    /// Retryable failure with no retries left.
    Exhausted(Message),
    /// Someone else holds the claim, or the message is no longer dispatchable.
    Skipped,
}

impl DispatchOutcome {
    #[must_use]
    pub const fn message(&self) -> Option<&Message> {
        match self {
            Self::Sent(m) | Self::Rescheduled(m) | Self::Failed(m) | Self::Exhausted(m) => Some(m),
            Self::Skipped => None,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sent(_) => "sent",
            Self::Rescheduled(_) => "rescheduled",
            Self::Failed(_) => "failed",
            Self::Exhausted(_) => "exhausted",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug)]
struct Metrics {
    sent: Counter<u64>,
    failures: Counter<u64>,
    exhausted: Counter<u64>,
    skipped: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("outbox-engine");
        Self {
            sent: meter
                .u64_counter("dispatch_sent_total")
                .with_description("Total number of messages accepted by the transport")
                .build(),
            failures: meter
                .u64_counter("dispatch_failures_total")
                .with_description("Total number of failed delivery attempts")
                .build(),
            exhausted: meter
                .u64_counter("dispatch_exhausted_total")
                .with_description("Total number of messages that used up their retry budget")
                .build(),
            skipped: meter
                .u64_counter("dispatch_skipped_total")
                .with_description("Total number of dispatches skipped because the claim was lost")
                .build(),
        }
    }
}

/// Runs one delivery attempt for one message and persists the outcome.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn Transport>,
    backoff: BackoffPolicy,
    metrics: Metrics,
}

impl Dispatcher {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, transport: Arc<dyn Transport>, backoff: BackoffPolicy) -> Self {
        Self { store, transport, backoff, metrics: Metrics::new() }
    }

    /// Claims the message, calls the transport and records the result.
    ///
    /// Transport failures are recorded on the message and never returned as errors.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the store fails, or `AppError::Conflict` if the claim
    /// disappeared while the transport call was in flight.
    #[tracing::instrument(level = "debug", skip(self), fields(outcome = tracing::field::Empty), err)]
    pub async fn dispatch(&self, message_id: Uuid, claim: Claim) -> Result<DispatchOutcome> {
        let claimed = match claim {
            Claim::DueBy(now) => self.store.claim_due(message_id, now).await?,
            Claim::Manual => self.store.claim(message_id, MANUAL_CLAIM).await?,
        };
        let Some(message) = claimed else {
            tracing::debug!("Message not claimable, skipping");
            self.metrics.skipped.add(1, &[]);
            tracing::Span::current().record("outcome", "skipped");
            return Ok(DispatchOutcome::Skipped);
        };

        let envelope = Envelope::from(&message);
        let outcome = match self.transport.deliver(&envelope).await {
            Ok(delivery) => self.complete(&message, delivery).await?,
            Err(e) => self.fail(&message, e).await?,
        };

        tracing::Span::current().record("outcome", outcome.label());
        Ok(outcome)
    }

    async fn complete(&self, message: &Message, delivery: Delivery) -> Result<DispatchOutcome> {
        let sent_at = OffsetDateTime::now_utc();

        // The provider has accepted the message at this point.
        let persisted = (|| self.store.mark_sent(message.id, sent_at, &delivery))
            .retry(ExponentialBuilder::default().with_max_times(3))
            .when(|e| matches!(e, AppError::Database(_)))
            .notify(|e, duration| {
                tracing::warn!(error = %e, retry_in = ?duration, "Failed to record delivery, retrying");
            })
            .await?;

        let sent = match persisted {
            Some(sent) => sent,
            // An earlier attempt may have committed before its reply was lost.
            None => match self.store.get(message.id).await? {
                Some(current) if current.status == MessageStatus::Sent => current,
                _ => {
                    tracing::error!(message_id = %message.id, "Message delivered but its claim was lost before recording");
                    return Err(AppError::Conflict("claim lost before delivery could be recorded".into()));
                }
            },
        };

        self.metrics.sent.add(1, &[]);
        tracing::info!(
            message_id = %sent.id,
            provider_message_id = %delivery.provider_message_id,
            "Message delivered"
        );
        Ok(DispatchOutcome::Sent(sent))
    }

    async fn fail(&self, message: &Message, error: TransportError) -> Result<DispatchOutcome> {
        let now = OffsetDateTime::now_utc();
        let retry_count = message.retry_count.saturating_add(1);

        let (status, scheduled_date) = if error.is_permanent() {
            (MessageStatus::Failed, None)
        } else if retry_count < message.max_retries {
            let attempt = u32::try_from(retry_count - 1).unwrap_or(0);
            (MessageStatus::Scheduled, Some(self.backoff.next_attempt_at(now, attempt)))
        } else {
            (MessageStatus::Exhausted, None)
        };

        let update = FailureUpdate {
            last_error: LastError { message: error.message.clone(), code: error.code.clone(), timestamp: now },
            retry_count,
            status,
            scheduled_date,
        };

        let reason = if error.is_permanent() { "permanent" } else { "retryable" };
        self.metrics.failures.add(1, &[KeyValue::new("reason", reason)]);

        let Some(updated) = self.store.record_failure(message.id, &update).await? else {
            tracing::error!(message_id = %message.id, "Delivery failed and the claim was lost before recording");
            return Err(AppError::Conflict("claim lost before failure could be recorded".into()));
        };

        let outcome = match status {
            MessageStatus::Scheduled => {
                tracing::warn!(
                    message_id = %updated.id,
                    error = %error,
                    retry_count,
                    next_attempt = ?scheduled_date,
                    "Delivery failed, rescheduled"
                );
                DispatchOutcome::Rescheduled(updated)
            }
            MessageStatus::Failed => {
                tracing::warn!(message_id = %updated.id, error = %error, "Delivery failed permanently");
                DispatchOutcome::Failed(updated)
            }
            _ => {
                tracing::warn!(message_id = %updated.id, error = %error, retry_count, "Retry budget exhausted");
                self.metrics.exhausted.add(1, &[]);
                DispatchOutcome::Exhausted(updated)
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryMessageStore;
    use crate::adapters::transport::TransportError;
    use crate::test_support::{ScriptedTransport, new_message};
    use time::Duration;

    fn setup(transport: ScriptedTransport) -> (Arc<InMemoryMessageStore>, Arc<ScriptedTransport>, Dispatcher) {
        crate::telemetry::init_test_telemetry();
        let store = Arc::new(InMemoryMessageStore::new());
        let transport = Arc::new(transport);
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), BackoffPolicy::default());
        (store, transport, dispatcher)
    }

    fn due_now() -> Claim {
        Claim::DueBy(OffsetDateTime::now_utc())
    }

    async fn scheduled_message(store: &InMemoryMessageStore, max_retries: i32) -> Message {
        let msg = store.create(new_message(Uuid::new_v4(), max_retries)).await.unwrap();
        store.schedule(msg.id, OffsetDateTime::now_utc() - Duration::seconds(1)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_success_marks_sent_with_provider_ids() {
        let (store, transport, dispatcher) = setup(ScriptedTransport::default());
        let msg = scheduled_message(&store, 3).await;

        let outcome = dispatcher.dispatch(msg.id, due_now()).await.unwrap();

        let DispatchOutcome::Sent(sent) = outcome else { panic!("expected Sent, got {outcome:?}") };
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.sent_date.is_some());
        assert!(sent.provider_message_id.is_some());
        assert_eq!(transport.calls(), 1);
        assert_eq!(transport.envelopes()[0].recipient_address, msg.recipient.address);
    }

    #[tokio::test]
    async fn test_retryable_failure_reschedules_with_backoff() {
        let (store, _transport, dispatcher) =
            setup(ScriptedTransport::with_results(vec![Err(TransportError::retryable("connection reset").with_code("ECONNRESET"))]));
        let msg = scheduled_message(&store, 3).await;
        let before = OffsetDateTime::now_utc();

        let outcome = dispatcher.dispatch(msg.id, due_now()).await.unwrap();

        let DispatchOutcome::Rescheduled(updated) = outcome else { panic!("expected Rescheduled, got {outcome:?}") };
        assert_eq!(updated.status, MessageStatus::Scheduled);
        assert_eq!(updated.retry_count, 1);
        let next = updated.scheduled_date.unwrap();
        assert!(next >= before + Duration::minutes(5));
        assert!(next > msg.scheduled_date.unwrap());
        let last_error = updated.last_error.unwrap();
        assert_eq!(last_error.message, "connection reset");
        assert_eq!(last_error.code.as_deref(), Some("ECONNRESET"));
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retry_budget() {
        let (store, _transport, dispatcher) =
            setup(ScriptedTransport::with_results(vec![Err(TransportError::permanent("invalid recipient address"))]));
        let msg = scheduled_message(&store, 3).await;

        let outcome = dispatcher.dispatch(msg.id, due_now()).await.unwrap();

        let DispatchOutcome::Failed(updated) = outcome else { panic!("expected Failed, got {outcome:?}") };
        assert_eq!(updated.status, MessageStatus::Failed);
        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.scheduled_date, msg.scheduled_date);
    }

    #[tokio::test]
    async fn test_last_retry_exhausts() {
        let (store, _transport, dispatcher) =
            setup(ScriptedTransport::with_results(vec![Err(TransportError::retryable("timeout"))]));
        let msg = scheduled_message(&store, 1).await;

        let outcome = dispatcher.dispatch(msg.id, due_now()).await.unwrap();

        let DispatchOutcome::Exhausted(updated) = outcome else { panic!("expected Exhausted, got {outcome:?}") };
        assert_eq!(updated.status, MessageStatus::Exhausted);
        assert_eq!(updated.retry_count, 1);
    }

    #[tokio::test]
    async fn test_claimed_message_is_skipped() {
        let (store, transport, dispatcher) = setup(ScriptedTransport::default());
        let msg = scheduled_message(&store, 3).await;
        store.claim(msg.id, &[MessageStatus::Scheduled]).await.unwrap();

        let outcome = dispatcher.dispatch(msg.id, due_now()).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_scheduler_claim_does_not_pick_up_drafts() {
        let (store, transport, dispatcher) = setup(ScriptedTransport::default());
        let draft = store.create(new_message(Uuid::new_v4(), 3)).await.unwrap();

        assert_eq!(dispatcher.dispatch(draft.id, due_now()).await.unwrap(), DispatchOutcome::Skipped);
        assert_eq!(transport.calls(), 0);

        let outcome = dispatcher.dispatch(draft.id, Claim::Manual).await.unwrap();
        assert_eq!(outcome.label(), "sent");
        assert!(outcome.message().unwrap().scheduled_date.is_none());
    }

    #[tokio::test]
    async fn test_due_claim_skips_message_rescheduled_into_the_future() {
        let (store, transport, dispatcher) = setup(ScriptedTransport::default());
        let msg = scheduled_message(&store, 3).await;
        let tick_now = OffsetDateTime::now_utc();
        store.schedule(msg.id, tick_now + Duration::minutes(5)).await.unwrap().unwrap();

        let outcome = dispatcher.dispatch(msg.id, Claim::DueBy(tick_now)).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(transport.calls(), 0);
        let unchanged = store.get(msg.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, MessageStatus::Scheduled);
        assert_eq!(unchanged.retry_count, 0);
    }

    /// Commits the first `mark_sent` but reports a pool timeout to the caller.
    #[derive(Debug, Default)]
    struct LostAckStore {
        inner: InMemoryMessageStore,
        dropped_reply: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl MessageStore for LostAckStore {
        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }

        async fn create(&self, new: crate::domain::message::NewMessage) -> Result<Message> {
            self.inner.create(new).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Message>> {
            self.inner.get(id).await
        }

        async fn update_content(&self, id: Uuid, subject: String, body: String) -> Result<Option<Message>> {
            self.inner.update_content(id, subject, body).await
        }

        async fn find_due_for_dispatch(&self, now: OffsetDateTime, limit: i64) -> Result<Vec<Message>> {
            self.inner.find_due_for_dispatch(now, limit).await
        }

        async fn count_by_status(
            &self,
            sender_id: Option<Uuid>,
        ) -> Result<std::collections::BTreeMap<MessageStatus, i64>> {
            self.inner.count_by_status(sender_id).await
        }

        async fn claim(&self, id: Uuid, from: &[MessageStatus]) -> Result<Option<Message>> {
            self.inner.claim(id, from).await
        }

        async fn claim_due(&self, id: Uuid, now: OffsetDateTime) -> Result<Option<Message>> {
            self.inner.claim_due(id, now).await
        }

        async fn mark_sent(&self, id: Uuid, sent_at: OffsetDateTime, delivery: &Delivery) -> Result<Option<Message>> {
            let committed = self.inner.mark_sent(id, sent_at, delivery).await?;
            if self.dropped_reply.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Ok(committed)
            } else {
                Err(AppError::Database(sqlx::Error::PoolTimedOut))
            }
        }

        async fn record_failure(&self, id: Uuid, update: &FailureUpdate) -> Result<Option<Message>> {
            self.inner.record_failure(id, update).await
        }

        async fn schedule(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Message>> {
            self.inner.schedule(id, at).await
        }

        async fn cancel(&self, id: Uuid) -> Result<Option<Message>> {
            self.inner.cancel(id).await
        }

        async fn soft_delete_terminal_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
            self.inner.soft_delete_terminal_before(cutoff).await
        }

        async fn release_stale_claims(&self, claimed_before: OffsetDateTime, now: OffsetDateTime) -> Result<u64> {
            self.inner.release_stale_claims(claimed_before, now).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_mark_sent_reply_still_reports_sent() {
        crate::telemetry::init_test_telemetry();
        let store = Arc::new(LostAckStore::default());
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), BackoffPolicy::default());
        let msg = store.create(new_message(Uuid::new_v4(), 3)).await.unwrap();

        let outcome = dispatcher.dispatch(msg.id, Claim::Manual).await.unwrap();

        let DispatchOutcome::Sent(sent) = outcome else { panic!("expected Sent, got {outcome:?}") };
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.sent_date.is_some());
        assert_eq!(transport.calls(), 1);
    }
}
