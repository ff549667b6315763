//! Long-running engine: reconciliation, signal dispatch and monitoring until Ctrl+C.

use crate::venue::{sentiment_provider, Venue};
use anyhow::Result;
use perp_guard_core::{AppConfig, TracingAlertSink};
use perp_guard_orchestrator::{ManagerEvent, TradingOrchestrator};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

pub async fn run(config: AppConfig) -> Result<()> {
    tracing::info!(
        stream = %config.stream.url,
        symbols = config.symbols.len(),
        paper = config.gateway.paper,
        "Starting perp-guard"
    );

    let venue = Venue::from_config(&config.gateway)?;
    let sentiment = sentiment_provider(&config.sentiment)?;
    let symbols: Vec<String> = config.symbols.iter().map(|s| s.symbol.clone()).collect();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if venue.is_paper() {
        venue.prime(&symbols).await?;
    }
    let mark_sync = venue.spawn_mark_sync(
        symbols,
        config.defaults.monitor_interval(),
        shutdown_rx.clone(),
    );

    let orchestrator =
        TradingOrchestrator::new(config, venue.gateway(), sentiment, Arc::new(TracingAlertSink))?;
    let event_log = tokio::spawn(log_events(orchestrator.subscribe()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await?;

    if let Some(handle) = mark_sync {
        let _ = handle.await;
    }
    event_log.abort();

    let status = orchestrator.status();
    for manager in &status.managers {
        tracing::info!(
            symbol = %manager.symbol,
            phase = ?manager.phase,
            realized_pnl = %manager.realized_pnl,
            "Final state"
        );
    }
    tracing::info!(dropped_signals = status.dropped_signals, "perp-guard stopped");
    Ok(())
}

/// Mirrors manager events as JSON lines under the `events` target.
async fn log_events(mut events: broadcast::Receiver<ManagerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => tracing::info!(target: "events", symbol = %event.symbol(), "{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
