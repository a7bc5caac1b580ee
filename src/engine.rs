use crate::adapters::transport::Transport;
use crate::config::{MaintenanceConfig, SchedulerConfig};
use crate::domain::backoff::BackoffPolicy;
use crate::domain::message::{Message, NewMessage};
use crate::domain::store::MessageStore;
use crate::error::Result;
use crate::services::dispatcher::Dispatcher;
use crate::services::health_service::HealthService;
use crate::services::message_service::MessageService;
use crate::services::stats_service::{EmailStats, StatsService};
use crate::workers::{DispatchWorker, MaintenanceWorker, Scheduler, SchedulerStatus, TickReport};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// The delivery engine: scheduler loop, manual trigger, lifecycle operations and stats over one store.
#[derive(Clone, Debug)]
pub struct Engine {
    scheduler: Arc<Scheduler>,
    messages: MessageService,
    stats: StatsService,
    health: HealthService,
    maintenance: MaintenanceConfig,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Starts the scheduler loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        self.scheduler.start().await
    }

    /// Stops the scheduler loop after the current tick. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        self.scheduler.stop().await
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    /// Runs one tick at `now` regardless of whether the loop is running.
    ///
    /// # Errors
    /// Returns an error if the due-message query fails.
    pub async fn tick(&self, now: OffsetDateTime) -> Result<TickReport> {
        self.scheduler.worker().tick_at(now).await
    }

    /// # Errors
    /// See [`MessageService::create_draft`].
    pub async fn create_draft(&self, new: NewMessage, max_retries: Option<i32>) -> Result<Message> {
        self.messages.create_draft(new, max_retries).await
    }

    /// # Errors
    /// See [`MessageService::get_message`].
    pub async fn get_message(&self, id: Uuid) -> Result<Message> {
        self.messages.get_message(id).await
    }

    /// # Errors
    /// See [`MessageService::update_content`].
    pub async fn update_content(&self, id: Uuid, subject: String, body: String) -> Result<Message> {
        self.messages.update_content(id, subject, body).await
    }

    /// # Errors
    /// See [`MessageService::send_now`].
    pub async fn send_now(&self, id: Uuid) -> Result<Message> {
        self.messages.send_now(id).await
    }

    /// # Errors
    /// See [`MessageService::schedule_email`].
    pub async fn schedule_email(&self, id: Uuid, at: OffsetDateTime) -> Result<Message> {
        self.messages.schedule_email(id, at).await
    }

    /// # Errors
    /// See [`MessageService::cancel_scheduled_email`].
    pub async fn cancel_scheduled_email(&self, id: Uuid) -> Result<Message> {
        self.messages.cancel_scheduled_email(id).await
    }

    /// # Errors
    /// Returns `AppError::Database` if the store fails.
    pub async fn get_email_stats(&self, sender_id: Option<Uuid>) -> Result<EmailStats> {
        self.stats.get_stats(sender_id).await
    }

    /// # Errors
    /// See [`MessageService::cleanup_old_emails`].
    pub async fn cleanup_old_emails(&self, days_old: i64) -> Result<u64> {
        self.messages.cleanup_old_emails(days_old).await
    }

    #[must_use]
    pub const fn health(&self) -> &HealthService {
        &self.health
    }

    /// Builds the retention and stale-claim sweeper; the caller decides where to spawn it.
    #[must_use]
    pub fn maintenance_worker(&self) -> MaintenanceWorker {
        MaintenanceWorker::new(self.messages.clone(), self.maintenance.clone())
    }
}

#[derive(Debug, Default)]
pub struct EngineBuilder {
    store: Option<Arc<dyn MessageStore>>,
    transport: Option<Arc<dyn Transport>>,
    scheduler: SchedulerConfig,
    maintenance: MaintenanceConfig,
}

impl EngineBuilder {
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    #[must_use]
    pub fn with_maintenance_config(mut self, config: MaintenanceConfig) -> Self {
        self.maintenance = config;
        self
    }

    /// # Errors
    /// Returns an error if the store or transport is missing.
    pub fn build(self) -> anyhow::Result<Engine> {
        let store = self.store.ok_or_else(|| anyhow::anyhow!("Message store is required"))?;
        let transport = self.transport.ok_or_else(|| anyhow::anyhow!("Transport is required"))?;

        let backoff = BackoffPolicy::from_secs(self.scheduler.backoff_base_secs);
        let dispatcher = Dispatcher::new(Arc::clone(&store), transport, backoff);
        let worker = DispatchWorker::new(Arc::clone(&store), dispatcher.clone(), &self.scheduler);
        let scheduler = Arc::new(Scheduler::new(worker));

        let messages = MessageService::new(Arc::clone(&store), dispatcher, self.scheduler.max_retries);
        let stats = StatsService::new(Arc::clone(&store), Arc::clone(&scheduler));
        let health = HealthService::new(store, HealthService::DEFAULT_TIMEOUT);

        Ok(Engine { scheduler, messages, stats, health, maintenance: self.maintenance })
    }
}
