use crate::domain::store::MessageStore;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Clone, Debug)]
pub struct Metrics {
    pub status: Gauge<i64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("outbox-engine");
        Self {
            status: meter
                .i64_gauge("outbox_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthService {
    store: Arc<dyn MessageStore>,
    store_timeout: Duration,
    metrics: Metrics,
}

impl HealthService {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, store_timeout: Duration) -> Self {
        Self { store, store_timeout, metrics: Metrics::new() }
    }

    /// Checks message store connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the store is unreachable.
    pub async fn check_store(&self) -> Result<(), String> {
        match timeout(self.store_timeout, self.store.ping()).await {
            Ok(Ok(())) => {
                self.metrics.status.record(1, &[KeyValue::new("component", "database")]);
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err(format!("Database connection failed: {e:?}"))
            }
            Err(_) => {
                self.metrics.status.record(0, &[KeyValue::new("component", "database")]);
                Err("Database connection timed out".to_string())
            }
        }
    }
}
