//! Daemon lifecycle: storage, sweeper, metrics, HTTP API, graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use secrecy::SecretString;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use codedrop_core::config::CodedropConfig;
use codedrop_storage::operator::build_from_core_config;
use codedrop_storage::{OpendalStore, S3Credentials};
use codedrop_transfer::{RetentionSweeper, SweepReport, TransferService};

use crate::api::{self, ApiState};
use crate::metrics::{self, HealthState, TransferMetrics};

/// Build the storage operator and verify connectivity. An unreachable
/// endpoint is only logged; the readiness probe reports it until it recovers.
async fn open_storage(
    config: &CodedropConfig,
    credentials: Option<&S3Credentials>,
) -> Result<(opendal::Operator, Arc<OpendalStore>)> {
    let op = build_from_core_config(&config.storage, credentials)
        .context("building storage operator")?;

    match codedrop_storage::check_health(&op).await {
        Ok(()) => info!(
            backend = %config.storage.backend,
            endpoint = %config.storage.endpoint,
            bucket = %config.storage.bucket,
            "storage: connected"
        ),
        Err(e) => warn!(endpoint = %config.storage.endpoint, "storage: {e}"),
    }

    let store = Arc::new(OpendalStore::new(op.clone()));
    Ok((op, store))
}

pub async fn run(
    config: CodedropConfig,
    credentials: Option<S3Credentials>,
    cleanup_secret: Option<SecretString>,
) -> Result<()> {
    info!("daemon starting");

    let (operator, store) = open_storage(&config, credentials.as_ref()).await?;

    let mut registry = Registry::default();
    let transfer_metrics = TransferMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    let service = TransferService::new(store, config.transfer.clone());
    let sweeper = {
        let m = transfer_metrics.clone();
        service
            .sweeper()
            .with_report_hook(Arc::new(move |report: &SweepReport| m.record_sweep(report)))
    };

    if cleanup_secret.is_none() {
        warn!("no cleanup secret configured: POST /cleanup is open to anyone");
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Start Prometheus metrics endpoint
    if let Some(addr) = config.server.metrics_addr.clone() {
        let state = HealthState {
            registry: registry.clone(),
            operator: operator.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // Start periodic retention sweeps
    let interval = config.retention.sweep_interval_secs;
    let sweeper_task = if interval > 0 {
        let sweeper = sweeper.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            sweeper
                .run_periodic(Duration::from_secs(interval), shutdown_rx)
                .await;
        }))
    } else {
        info!("periodic retention sweeps disabled (sweep_interval_secs = 0)");
        None
    };

    let state = ApiState {
        service,
        sweeper,
        cleanup_secret: cleanup_secret.map(Arc::new),
        metrics: transfer_metrics,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding API listener {}", config.server.listen))?;
    info!(addr = %config.server.listen, "api: listening");

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let tx = shutdown_tx.clone();

    notify_ready();

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
            let _ = tx.send(());
        })
        .await
        .context("api server")?;

    if let Some(task) = sweeper_task {
        let _ = task.await;
    }

    info!("codedropd exiting cleanly");
    Ok(())
}

/// One retention sweep, then exit. Fails when any expired record could not be
/// removed so cron-style schedulers surface it.
pub async fn sweep_once(
    config: CodedropConfig,
    credentials: Option<S3Credentials>,
) -> Result<SweepReport> {
    let (_, store) = open_storage(&config, credentials.as_ref()).await?;

    let report = RetentionSweeper::new(store)
        .purge_expired()
        .await
        .context("retention sweep")?;

    if report.failed > 0 {
        anyhow::bail!(
            "{} of {} transfer records could not be swept",
            report.failed,
            report.checked
        );
    }
    Ok(report)
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> CodedropConfig {
        let mut config = CodedropConfig::default();
        config.storage.backend = "memory".into();
        config
    }

    #[tokio::test]
    async fn test_sweep_once_on_empty_memory_store() {
        let report = sweep_once(memory_config(), None).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_s3_without_credentials_fails_fast() {
        let err = sweep_once(CodedropConfig::default(), None).await.unwrap_err();
        assert!(format!("{err:#}").contains("AWS_ACCESS_KEY_ID"));
    }
}
