//! ddl_relay - schema change relay
//!
//! Polls the DDL capture queue of every monitored database and relays each
//! pending change into the central audit log, then posts a notification.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ddl_relay::api;
use ddl_relay::jobs::PollingScheduler;
use ddl_relay::notify::{self, Notifier};
use ddl_relay::pool::PoolManager;
use ddl_relay::relay::RelayWorker;
use ddl_relay::store::PgConnector;
use ddl_relay::Config;

/// Initialize tracing/logging; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ddl_relay=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let notifier = notify::from_config(&config.notifier);

    if let Err(e) = run(config, Arc::clone(&notifier)).await {
        tracing::error!(error = %e, "Relay stopped with an error");
        if let Err(notify_err) = notifier.notify_error("Startup", &e.to_string()).await {
            tracing::warn!(error = %notify_err, "Failed to send error notification");
        }
        return Err(e);
    }

    Ok(())
}

async fn run(config: Config, notifier: Arc<dyn Notifier>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        sources = config.sources.len(),
        notifier = notifier.kind(),
        "Starting ddl_relay"
    );

    if config.relay.retry_delay_exceeds_interval() {
        tracing::warn!(
            retry_delay_secs = config.relay.retry_delay.as_secs(),
            polling_interval_secs = config.relay.polling_interval.as_secs(),
            "Retry delay exceeds polling interval; failed events are retried every cycle"
        );
    }

    let mut worker = RelayWorker::new(
        PoolManager::new(PgConnector),
        config.central.clone(),
        config.sources.clone(),
        config.relay.clone(),
        Arc::clone(&notifier),
    );

    tracing::info!("Connecting to stores...");
    worker.validate_stores().await?;

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut scheduler = PollingScheduler::new(worker);
    let app = api::create_router(scheduler.status_board());

    let monitored = config
        .sources
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if let Err(e) = notifier
        .notify_status("Online", Some(&format!("Monitoring: {}", monitored)))
        .await
    {
        tracing::warn!(error = %e, "Failed to send status notification");
    }

    scheduler.start().await;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Relay shutting down...");
    if let Err(e) = notifier
        .notify_status("Offline", Some("Relay is shutting down"))
        .await
    {
        tracing::warn!(error = %e, "Failed to send status notification");
    }

    scheduler.stop().await;

    let report = scheduler.close_pools().await;
    if !report.failures.is_empty() {
        tracing::warn!(failures = ?report.failures, "Some pools failed to close");
    }

    tracing::info!("Connections closed. Goodbye!");
    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
