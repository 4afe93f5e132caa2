use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lead_dispatch::CampaignEngine;
use lead_dispatch::api;
use lead_dispatch::campaign::{CampaignRegistry, spawn_prune_task};
use lead_dispatch::config::{EngineConfig, ServerConfig};
use lead_dispatch::store::{LeadStore, LibSqlBackend};
use lead_dispatch::transport::{Transport, WebhookTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server = ServerConfig::from_env().context("invalid server configuration")?;
    let _log_guard = init_tracing(server.log_dir.as_deref());

    let config = EngineConfig::from_env().context("invalid engine configuration")?;

    eprintln!("📨 Lead Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", server.port);
    eprintln!(
        "   Delay: {}s default, clamped to [{}s, {}s]",
        config.dispatch.default_delay_secs,
        config.dispatch.min_delay_secs,
        config.dispatch.max_delay_secs
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn LeadStore> = Arc::new(
        LibSqlBackend::new_local(&server.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", server.db_path.display()))?,
    );
    eprintln!("   Database: {}", server.db_path.display());

    // ── Transport ────────────────────────────────────────────────────────
    let transport = WebhookTransport::from_config(&server);
    match transport.check_ready().await {
        Ok(()) => eprintln!("   Webhook: configured"),
        Err(e) => {
            tracing::warn!(error = %e, "Webhook transport not ready; launches will fail until configured");
            eprintln!("   Webhook: not configured");
        }
    }

    // ── Engine ───────────────────────────────────────────────────────────
    let registry = CampaignRegistry::new();
    let _prune_handle = spawn_prune_task(
        Arc::clone(&registry),
        config.registry.prune_interval,
        config.registry.terminal_ttl,
    );
    let engine = Arc::new(
        CampaignEngine::new(config, store, Arc::new(transport))?.with_registry(registry),
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api::routes(engine);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server.port))
        .await
        .with_context(|| format!("failed to bind port {}", server.port))?;
    tracing::info!(port = server.port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Shut down");
    Ok(())
}

/// Stderr logging plus an optional daily-rolling file. Keep the returned
/// guard alive so buffered file output is flushed on exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lead-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
