//! SipSync Server - Main entry point.
//!
//! This binary starts the completion fan-out server with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`sipsync_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development mode (no trigger secret)
//! SIPSYNC_UNSAFE_NO_AUTH=true \
//! SIPSYNC_DIRECTORY_URL=http://localhost:9001 SIPSYNC_DIRECTORY_API_KEY=dev \
//! SIPSYNC_PUSH_URL=http://localhost:9002 SIPSYNC_PUSH_API_KEY=dev \
//! cargo run --bin sipsync-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use sipsync_server::config::Config;
use sipsync_server::directory::RestDirectory;
use sipsync_server::fanout::FanOut;
use sipsync_server::push::HttpPushClient;
use sipsync_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  SIPSYNC_TRIGGER_SECRET     - Shared secret sent by the document store");
            eprintln!("  SIPSYNC_DIRECTORY_URL      - Profile directory base URL");
            eprintln!("  SIPSYNC_DIRECTORY_API_KEY  - Profile directory API key");
            eprintln!("  SIPSYNC_PUSH_URL           - Push service base URL");
            eprintln!("  SIPSYNC_PUSH_API_KEY       - Push service API key");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                       - HTTP server port (default: 8080)");
            eprintln!("  SIPSYNC_REQUEST_TIMEOUT_MS - Outbound call timeout (default: 5000)");
            eprintln!("  RUST_LOG                   - Log level filter (default: info)");
            eprintln!("  SIPSYNC_UNSAFE_NO_AUTH     - Skip the trigger secret (dev only)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "Server failed");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let auth_mode = if config.unsafe_no_auth {
        "disabled (UNSAFE)"
    } else {
        "enabled"
    };
    info!(
        port = config.port,
        auth_mode,
        directory = %config.directory_url,
        push = %config.push_url,
        timeout_ms = config.request_timeout.as_millis() as u64,
        "SipSync server starting"
    );

    let timeout = config.request_timeout;
    let directory = RestDirectory::new(&config.directory_url, &config.directory_api_key, timeout)
        .context("Failed to create directory client")?;
    let push = HttpPushClient::new(&config.push_url, &config.push_api_key, timeout)
        .context("Failed to create push client")?;
    let fanout = FanOut::new(Arc::new(directory), Arc::new(push), timeout);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let app = create_router(AppState::new(config, fanout));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down gracefully");
    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info,tower_http=debug`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves on SIGTERM or SIGINT.
///
/// If a handler cannot be installed, that signal is ignored and the other
/// still triggers shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
