//! Room service entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use roomsvc_api::{AppState, app};
use roomsvc_common::Config;
use roomsvc_common::config::{LogStyle, LoggingConfig};
use roomsvc_core::{HttpAttendeeRegistry, HttpMailService, HttpUserInfoProvider};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// `--config <file>` or `--config=<file>` from the command line.
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Install the global subscriber. `RUST_LOG` overrides the configured severity.
fn init_tracing(logging: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.severity.as_filter()));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.style {
        LogStyle::Plain => registry.with(fmt::layer()).init(),
        LogStyle::Ecs => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match config_path() {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("invalid configuration in {}", path.display()))?,
        None => Config::load().context("invalid configuration")?,
    };

    init_tracing(config.logging);
    info!(service = %config.service.name, "Starting room service...");

    // Repository
    let repo = roomsvc_db::open(&config).await?;

    // Downstream clients inherit the response deadline
    let downstream_timeout = Duration::from_secs(config.server.write_timeout_seconds);
    let registry = Arc::new(HttpAttendeeRegistry::new(
        config.service.attendee_service_url.clone(),
        downstream_timeout,
    )?);
    let mailer = Arc::new(HttpMailService::new(
        &config.service.mail_service_url,
        downstream_timeout,
    )?);
    let userinfo = Arc::new(HttpUserInfoProvider::new(
        config.security.oidc.userinfo_url.clone(),
        downstream_timeout,
    )?);

    let state = AppState::new(&config, repo, registry, mailer, userinfo)?;
    let router = app(state, &config);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, router).with_graceful_shutdown({
        let stop = stop.clone();
        async move { stop.notified().await }
    });
    let mut serving = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut serving => {
            result??;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    stop.notify_one();
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    match tokio::time::timeout(grace, serving).await {
        Ok(result) => result??,
        Err(_) => warn!(
            grace_seconds = config.server.shutdown_grace_seconds,
            "Grace period elapsed, abandoning in-flight requests"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}
