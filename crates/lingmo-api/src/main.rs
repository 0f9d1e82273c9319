//! Lingmo gateway CLI and HTTP server entry point.
//!
//! Binary name: `lingmo`
//!
//! Parses CLI arguments, initializes storage and the routing core, then
//! dispatches to a command handler or starts the HTTP server.

mod cli;
mod http;
mod state;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_complete::generate;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use state::AppState;

/// How long shutdown waits for queued audit events to be written.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info,tower_http=warn",
        1 => "info,lingmo_core=debug,lingmo_infra=debug,lingmo_api=debug",
        _ => "trace",
    };
    lingmo_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "lingmo", &mut std::io::stdout());
        return Ok(());
    }

    let (state, audit_writer) = AppState::init().await?;

    let result = match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.host.clone());
            let port = port.unwrap_or(state.config.port);
            serve(state, format!("{host}:{port}"), cli.quiet).await
        }
        Commands::Models => {
            let result = cli::models::list_models(&state, cli.json).await;
            drop(state);
            result
        }
        Commands::Status => {
            let result = cli::status::status(&state, cli.json).await;
            drop(state);
            result
        }
        Commands::Completions { .. } => Ok(()),
    };

    drain_audit(audit_writer).await;
    lingmo_observe::tracing_setup::shutdown_tracing();
    result
}

async fn serve(state: AppState, addr: String, quiet: bool) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    if !quiet {
        println!(
            "  {} Lingmo gateway listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        if state.settings.current().gateway_api_key.is_blank() {
            println!(
                "  {} No gateway API key set; every request will get 401. Set {} or PUT /api/config/gateway_api_key.",
                console::style("!").yellow().bold(),
                state::API_KEY_ENV
            );
        }
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let cancel = CancellationToken::new();
    let sync_task: JoinHandle<()> = {
        let synchronizer = Arc::clone(&state.synchronizer);
        let interval = state.config.quota_sync_interval();
        let cancel = cancel.clone();
        tokio::spawn(async move { synchronizer.run(interval, cancel).await })
    };

    let router = http::router::build_router(state);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Flushes quota snapshots before returning.
    cancel.cancel();
    if let Err(err) = sync_task.await {
        tracing::error!(error = %err, "Quota synchronizer task failed");
    }

    if !quiet {
        println!("\n  Server stopped.");
    }
    served.map_err(Into::into)
}

/// Wait for the audit writer to flush once every emitter is gone.
async fn drain_audit(writer: JoinHandle<u64>) {
    match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(written)) => tracing::debug!(written, "Audit log drained"),
        Ok(Err(err)) => tracing::error!(error = %err, "Audit writer task failed"),
        Err(_) => tracing::warn!("Timed out waiting for audit writer"),
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
