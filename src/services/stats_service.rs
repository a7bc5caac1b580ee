use crate::domain::message::MessageStatus;
use crate::domain::store::MessageStore;
use crate::error::Result;
use crate::workers::scheduler::{Scheduler, SchedulerStatus};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStats {
    /// Every status is present, including those with no messages.
    pub by_status: BTreeMap<MessageStatus, i64>,
    pub total_scheduled: i64,
    pub scheduler: SchedulerStatus,
}

#[derive(Clone, Debug)]
pub struct StatsService {
    store: Arc<dyn MessageStore>,
    scheduler: Arc<Scheduler>,
}

impl StatsService {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, scheduler: Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    /// Counts active messages by status, optionally for a single sender.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the store fails.
    #[tracing::instrument(level = "debug", skip(self), err)]
    pub async fn get_stats(&self, sender_id: Option<Uuid>) -> Result<EmailStats> {
        let counts = self.store.count_by_status(sender_id).await?;
        let by_status: BTreeMap<MessageStatus, i64> = MessageStatus::ALL
            .into_iter()
            .map(|status| (status, counts.get(&status).copied().unwrap_or(0)))
            .collect();
        let total_scheduled = by_status.get(&MessageStatus::Scheduled).copied().unwrap_or(0);

        Ok(EmailStats { by_status, total_scheduled, scheduler: self.scheduler.status().await })
    }
}
