#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

use backon::{ExponentialBuilder, Retryable};
use outbox_engine::adapters::database::{self, PgMessageStore};
use outbox_engine::adapters::transport::{LogTransport, TimeoutTransport};
use outbox_engine::api::MgmtState;
use outbox_engine::config::Config;
use outbox_engine::{Engine, telemetry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;

    outbox_engine::setup_panic_hook();

    let boot_span = tracing::info_span!("boot_engine");
    let (mgmt_listener, mgmt_app, engine, shutdown_tx, shutdown_rx) = async {
        // Phase 1: Infrastructure Setup (Resources)
        let pool = (|| database::init_pool(&config.database))
            .retry(ExponentialBuilder::default().with_max_times(5))
            .notify(|e, duration| {
                tracing::warn!(error = %e, retry_in = ?duration, "Database not reachable, retrying");
            })
            .await?;
        database::run_migrations(&pool).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        outbox_engine::spawn_signal_handler(shutdown_tx.clone());

        // Phase 2: Component Wiring
        let transport = TimeoutTransport::new(
            LogTransport,
            Duration::from_secs(config.scheduler.transport_timeout_secs),
        );
        let engine = Engine::builder()
            .with_store(Arc::new(PgMessageStore::new(pool)))
            .with_transport(Arc::new(transport))
            .with_scheduler_config(config.scheduler.clone())
            .with_maintenance_config(config.maintenance.clone())
            .build()?;

        // Phase 3: Runtime Setup
        let mgmt_app = outbox_engine::api::mgmt_router(MgmtState { engine: engine.clone() });
        let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;
        tracing::info!(address = %mgmt_addr, "management server listening");
        let mgmt_listener = tokio::net::TcpListener::bind(mgmt_addr).await?;

        Ok::<(tokio::net::TcpListener, axum::Router, Engine, watch::Sender<bool>, watch::Receiver<bool>), anyhow::Error>(
            (mgmt_listener, mgmt_app, engine, shutdown_tx, shutdown_rx),
        )
    }
    .instrument(boot_span)
    .await?;

    // Phase 4: Start Runtime
    if config.scheduler.autostart {
        engine.start().await;
    }
    let maintenance_task = tokio::spawn(
        engine.maintenance_worker().run(shutdown_rx.clone()).instrument(tracing::info_span!("maintenance_worker")),
    );

    let mut mgmt_rx = shutdown_rx.clone();
    let mgmt_server = axum::serve(mgmt_listener, mgmt_app).with_graceful_shutdown(async move {
        let _ = mgmt_rx.wait_for(|&s| s).await;
    });

    if let Err(e) = mgmt_server.await {
        tracing::error!(error = %e, "Server error");
    }

    // Phase 5: Graceful Shutdown Orchestration
    let _ = shutdown_tx.send(true);
    tokio::select! {
        () = async {
            engine.stop().await;
            let _ = maintenance_task.await;
        } => {
            tracing::info!("Background tasks finished.");
        }
        () = tokio::time::sleep(Duration::from_secs(config.server.shutdown_timeout_secs)) => {
            tracing::warn!("Timeout waiting for background tasks to finish.");
        }
    }

    telemetry_guard.shutdown();
    Ok(())
}
