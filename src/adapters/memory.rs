use crate::domain::message::{Delivery, Message, MessageStatus, NewMessage};
use crate::domain::store::{FailureUpdate, MessageStore};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Process-local store. Each entry is mutated under its shard lock, which makes the
/// conditional transitions atomic.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMessageStore {
    messages: Arc<DashMap<Uuid, Message>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `f` if the active message is in one of `from`.
    fn transition(&self, id: Uuid, from: &[MessageStatus], f: impl FnOnce(&mut Message)) -> Option<Message> {
        self.transition_when(id, |m| from.contains(&m.status), f)
    }

    /// Applies `f` if the active message satisfies `guard`, under the entry lock.
    fn transition_when(
        &self,
        id: Uuid,
        guard: impl FnOnce(&Message) -> bool,
        f: impl FnOnce(&mut Message),
    ) -> Option<Message> {
        let mut entry = self.messages.get_mut(&id)?;
        let message = entry.value_mut();
        if !message.is_active || !guard(message) {
            return None;
        }
        f(message);
        message.updated_at = OffsetDateTime::now_utc();
        Some(message.clone())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, new: NewMessage) -> Result<Message> {
        let message = Message::draft(new, OffsetDateTime::now_utc());
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.get(&id).filter(|m| m.is_active).map(|m| m.value().clone()))
    }

    async fn update_content(&self, id: Uuid, subject: String, body: String) -> Result<Option<Message>> {
        Ok(self.transition(id, &[MessageStatus::Draft, MessageStatus::Scheduled], |m| {
            m.subject = subject;
            m.body = body;
        }))
    }

    async fn find_due_for_dispatch(&self, now: OffsetDateTime, limit: i64) -> Result<Vec<Message>> {
        let mut due: Vec<Message> =
            self.messages.iter().filter(|m| m.is_due_at(now)).map(|m| m.value().clone()).collect();
        due.sort_by_key(|m| (m.scheduled_date, m.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn count_by_status(&self, sender_id: Option<Uuid>) -> Result<BTreeMap<MessageStatus, i64>> {
        let mut counts = BTreeMap::new();
        for entry in self.messages.iter() {
            let message = entry.value();
            if message.is_active && sender_id.is_none_or(|sender| message.sender.user_id == sender) {
                *counts.entry(message.status).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn claim(&self, id: Uuid, from: &[MessageStatus]) -> Result<Option<Message>> {
        Ok(self.transition(id, from, |m| m.status = MessageStatus::Sending))
    }

    async fn claim_due(&self, id: Uuid, now: OffsetDateTime) -> Result<Option<Message>> {
        Ok(self.transition_when(id, |m| m.is_due_at(now), |m| m.status = MessageStatus::Sending))
    }

    async fn mark_sent(&self, id: Uuid, sent_at: OffsetDateTime, delivery: &Delivery) -> Result<Option<Message>> {
        Ok(self.transition(id, &[MessageStatus::Sending], |m| {
            m.status = MessageStatus::Sent;
            m.sent_date = Some(sent_at);
            m.provider_message_id = Some(delivery.provider_message_id.clone());
            m.provider_thread_id.clone_from(&delivery.provider_thread_id);
        }))
    }

    async fn record_failure(&self, id: Uuid, update: &FailureUpdate) -> Result<Option<Message>> {
        Ok(self.transition(id, &[MessageStatus::Sending], |m| {
            m.status = update.status;
            m.retry_count = update.retry_count;
            m.last_error = Some(update.last_error.clone());
            if update.scheduled_date.is_some() {
                m.scheduled_date = update.scheduled_date;
            }
        }))
    }

    async fn schedule(&self, id: Uuid, at: OffsetDateTime) -> Result<Option<Message>> {
        Ok(self.transition(id, &[MessageStatus::Draft, MessageStatus::Scheduled], |m| {
            m.status = MessageStatus::Scheduled;
            m.scheduled_date = Some(at);
        }))
    }

    async fn cancel(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.transition(id, &[MessageStatus::Scheduled], |m| m.status = MessageStatus::Cancelled))
    }

    async fn soft_delete_terminal_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let mut deleted = 0;
        for mut entry in self.messages.iter_mut() {
            let message = entry.value_mut();
            if message.is_active && message.status.is_terminal() && message.updated_at < cutoff {
                message.is_active = false;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn release_stale_claims(&self, claimed_before: OffsetDateTime, now: OffsetDateTime) -> Result<u64> {
        let mut released = 0;
        for mut entry in self.messages.iter_mut() {
            let message = entry.value_mut();
            if message.is_active && message.status == MessageStatus::Sending && message.updated_at < claimed_before {
                message.status = MessageStatus::Scheduled;
                message.scheduled_date = Some(now);
                message.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }
}
