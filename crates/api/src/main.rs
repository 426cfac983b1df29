//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{AppState, Stores, spawn_workers};
use broker::{Broker, InMemoryBroker, InMemoryConnector, connect_with_retry};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = api::routes::metrics::install_recorder()?;

    // 3. Stores and broker
    let stores = Stores::from_config(&config).await?;
    let connector = InMemoryConnector::new(InMemoryBroker::with_config(config.broker_config()));
    let broker = connect_with_retry(&connector, &config.connect_strategy()).await?;
    tracing::info!(
        exchange = %config.broker_exchange,
        history_limit = config.broker_history_limit,
        "broker ready"
    );

    // 4. Components and background workers
    let state = Arc::new(AppState::new(stores, broker.clone(), &config));
    let shutdown = CancellationToken::new();
    let workers = spawn_workers(
        &state,
        broker.clone(),
        config.consumer_config(),
        config.reaper_config(),
        shutdown.clone(),
    );

    // 5. Serve until a signal arrives or a consumer stops for good
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future(),
    );

    let mut failed = false;
    for (name, handle) in workers.consumers {
        match handle.await {
            Ok(Ok(report)) => tracing::info!(
                consumer = name,
                acked = report.acked,
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                forced_stop = report.forced_stop,
                "consumer stopped"
            ),
            Ok(Err(error)) => {
                tracing::error!(consumer = name, error = %error, "consumer failed, shutting down");
                failed = true;
            }
            Err(error) => {
                tracing::error!(consumer = name, error = %error, "consumer task panicked");
                failed = true;
                shutdown.cancel();
            }
        }
    }
    workers.reaper.await?;
    server.await??;
    broker.close().await?;

    tracing::info!("server shut down gracefully");
    if failed {
        return Err("a consumer stopped with a fatal error".into());
    }
    Ok(())
}
