use crate::config::SchedulerConfig;
use crate::domain::store::MessageStore;
use crate::error::Result;
use crate::services::dispatcher::{Claim, DispatchOutcome, Dispatcher};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

/// Tally of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent(_) => self.sent += 1,
            DispatchOutcome::Rescheduled(_) => self.rescheduled += 1,
            DispatchOutcome::Failed(_) => self.failed += 1,
            DispatchOutcome::Exhausted(_) => self.exhausted += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Polls the store for due messages and feeds them to the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatchWorker {
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    interval: Duration,
    batch_limit: i64,
    concurrency: usize,
}

impl DispatchWorker {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Dispatcher, config: &SchedulerConfig) -> Self {
        Self {
            store,
            dispatcher,
            interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            batch_limit: config.batch_limit,
            concurrency: config.worker_concurrency.max(1),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_at(OffsetDateTime::now_utc())
                        .instrument(tracing::info_span!("dispatch_tick"))
                        .await
                    {
                        tracing::error!(error = %e, "Failed to poll due messages");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Dispatch scheduler shutting down...");
    }

    /// Dispatches every message due at `now`, oldest first.
    ///
    /// A failure on one message is logged and counted; the rest of the batch still runs.
    ///
    /// # Errors
    /// Returns an error only if the due-message query itself fails.
    #[tracing::instrument(level = "debug", skip(self), err, fields(due = tracing::field::Empty))]
    pub async fn tick_at(&self, now: OffsetDateTime) -> Result<TickReport> {
        let due = self.store.find_due_for_dispatch(now, self.batch_limit).await?;
        let mut report = TickReport { due: due.len(), ..TickReport::default() };

        if due.is_empty() {
            tracing::debug!("No due messages found");
            return Ok(report);
        }
        tracing::Span::current().record("due", due.len());
        tracing::info!(count = due.len(), "Processing due messages");

        // `buffered` starts dispatches in queue order and keeps at most `concurrency` in flight.
        let results: Vec<_> = futures::stream::iter(due)
            .map(|message| {
                let dispatcher = &self.dispatcher;
                let message_id = message.id;
                async move { (message_id, dispatcher.dispatch(message_id, Claim::DueBy(now)).await) }
                    .instrument(tracing::debug_span!("dispatch_message", %message_id))
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (message_id, result) in results {
            match result {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    tracing::error!(error = %e, %message_id, "Dispatch failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub active_since: Option<OffsetDateTime>,
    pub tick_interval_secs: u64,
}

#[derive(Debug)]
struct Running {
    started_at: OffsetDateTime,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Starts and stops the dispatch loop. Both operations are idempotent.
#[derive(Debug)]
pub struct Scheduler {
    worker: DispatchWorker,
    state: Mutex<Option<Running>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(worker: DispatchWorker) -> Self {
        Self { worker, state: Mutex::new(None) }
    }

    #[must_use]
    pub const fn worker(&self) -> &DispatchWorker {
        &self.worker
    }

    /// Spawns the loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            tracing::info!("Scheduler already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle =
            tokio::spawn(self.worker.clone().run(shutdown_rx).instrument(tracing::info_span!("dispatch_scheduler")));
        let started_at = OffsetDateTime::now_utc();
        *state = Some(Running { started_at, shutdown_tx, handle });

        tracing::info!(interval_secs = self.worker.interval.as_secs(), "Scheduler started");
        true
    }

    /// Signals the loop to stop and waits for the current tick to finish.
    /// Returns `false` if it was not running.
    ///
    /// The state lock is held until the loop has exited, so a concurrent `start` cannot overlap it.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            tracing::info!("Scheduler already stopped");
            return false;
        };

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
        tracing::info!("Scheduler stopped");
        true
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        let active_since =
            state.as_ref().filter(|running| !running.handle.is_finished()).map(|running| running.started_at);
        SchedulerStatus {
            running: active_since.is_some(),
            active_since,
            tick_interval_secs: self.worker.interval.as_secs(),
        }
    }
}
