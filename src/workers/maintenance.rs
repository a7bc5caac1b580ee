use crate::config::MaintenanceConfig;
use crate::error::AppError;
use crate::services::message_service::MessageService;
use opentelemetry::{global, metrics::Counter};
use std::time::Duration;
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    soft_deleted: Counter<u64>,
    claims_released: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("outbox-engine");
        Self {
            soft_deleted: meter
                .u64_counter("cleanup_soft_deleted_total")
                .with_description("Total terminal messages soft-deleted by the retention sweep")
                .build(),
            claims_released: meter
                .u64_counter("claims_released_total")
                .with_description("Total abandoned claims returned to the queue")
                .build(),
        }
    }
}

/// Background sweeps: retention of terminal messages and recovery of abandoned claims.
#[derive(Debug)]
pub struct MaintenanceWorker {
    messages: MessageService,
    config: MaintenanceConfig,
    metrics: Metrics,
}

impl MaintenanceWorker {
    #[must_use]
    pub fn new(messages: MessageService, config: MaintenanceConfig) -> Self {
        Self { messages, config, metrics: Metrics::new() }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_secs.max(1)));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.perform_maintenance()
                        .instrument(tracing::info_span!("maintenance_iteration"))
                        .await
                    {
                        tracing::error!(error = ?e, "Maintenance iteration failed");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Maintenance loop shutting down...");
    }

    /// Releases stale claims, then soft-deletes terminal messages past retention.
    ///
    /// Each sweep is attempted even if the other one fails.
    ///
    /// # Errors
    /// Returns the first error encountered.
    #[tracing::instrument(
        skip(self),
        err,
        fields(claims_released = tracing::field::Empty, soft_deleted = tracing::field::Empty)
    )]
    pub async fn perform_maintenance(&self) -> Result<(), AppError> {
        tracing::debug!("Running maintenance (stale claims + retention)...");

        let released = self
            .messages
            .release_stale_claims(Duration::from_secs(self.config.stale_claim_timeout_secs))
            .await;
        match &released {
            Ok(count) if *count > 0 => {
                tracing::warn!(count = %count, "Released abandoned claims");
                self.metrics.claims_released.add(*count, &[]);
                tracing::Span::current().record("claims_released", count);
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "Maintenance error (stale claims)"),
        }

        let deleted = self.messages.cleanup_old_emails(self.config.retention_days).await;
        match &deleted {
            Ok(count) if *count > 0 => {
                self.metrics.soft_deleted.add(*count, &[]);
                tracing::Span::current().record("soft_deleted", count);
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "Maintenance error (retention)"),
        }

        released?;
        deleted?;
        Ok(())
    }
}
