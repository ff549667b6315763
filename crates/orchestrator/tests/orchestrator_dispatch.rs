mod common;

use common::RecordingAlerts;
use perp_guard_core::{
    AppConfig, Direction, GatewayError, OrchestratorConfig, RetryConfig, Settings, Signal,
    SignalDirection, StreamConfig, SymbolConfig,
};
use perp_guard_hyperliquid::{PaperGateway, PaperOp};
use perp_guard_orchestrator::{PhaseKind, TradingOrchestrator};
use perp_guard_sentiment::StaticSentiment;
use perp_guard_signal_feed::FeedHealth;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

fn config(dir: &Path, symbols: &[&str]) -> AppConfig {
    AppConfig {
        stream: StreamConfig {
            // Nothing listens here; the feed fails fast and goes fatal.
            url: "ws://127.0.0.1:1/signals".to_string(),
            reconnect_delay_ms: 10,
            max_reconnect_attempts: 1,
            queue_capacity: 16,
            ping_interval_ms: 30_000,
        },
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 5,
            max_delay_ms: 10,
        },
        orchestrator: OrchestratorConfig {
            health_check_interval_ms: 100,
            snapshot_path: dir.join("positions.json"),
            event_buffer: 64,
        },
        defaults: Settings {
            monitor_interval_ms: 50,
            post_action_settle_ms: 20,
            ..Settings::default()
        },
        symbols: symbols
            .iter()
            .map(|s| SymbolConfig {
                symbol: (*s).to_string(),
                directions: vec![Direction::Long, Direction::Short],
                overrides: Default::default(),
            })
            .collect(),
        ..AppConfig::default()
    }
}

fn venue() -> Arc<PaperGateway> {
    let gateway = Arc::new(PaperGateway::new(dec!(1000), dec!(0.25)));
    gateway.set_mark("BTC", dec!(100));
    gateway.set_mark("ETH", dec!(10));
    gateway
}

fn build(
    dir: &Path,
    symbols: &[&str],
    gateway: &Arc<PaperGateway>,
    alerts: &Arc<RecordingAlerts>,
) -> TradingOrchestrator {
    TradingOrchestrator::new(
        config(dir, symbols),
        gateway.clone(),
        Arc::new(StaticSentiment::default()),
        alerts.clone(),
    )
    .unwrap()
}

#[test]
fn rejects_empty_and_invalid_configuration() {
    let dir = TempDir::new().unwrap();
    let gateway = venue();
    let alerts = Arc::new(RecordingAlerts::default());

    let empty = TradingOrchestrator::new(
        config(dir.path(), &[]),
        gateway.clone(),
        Arc::new(StaticSentiment::default()),
        alerts.clone(),
    );
    assert!(empty.is_err());

    let mut invalid = config(dir.path(), &["BTC"]);
    invalid.defaults.confirmation_hit_count = 0;
    let invalid = TradingOrchestrator::new(
        invalid,
        gateway,
        Arc::new(StaticSentiment::default()),
        alerts,
    );
    assert!(invalid.is_err());
}

#[tokio::test]
async fn reconcile_all_adopts_open_positions_and_writes_snapshot() {
    let dir = TempDir::new().unwrap();
    let gateway = venue();
    gateway.seed_position("ETH", dec!(-10), dec!(10));
    let alerts = Arc::new(RecordingAlerts::default());
    let orchestrator = build(dir.path(), &["BTC", "ETH"], &gateway, &alerts);

    assert_eq!(orchestrator.reconcile_all().await, 1);

    assert_eq!(orchestrator.manager("BTC").unwrap().phase(), PhaseKind::Flat);
    let eth = orchestrator.manager("ETH").unwrap().status();
    assert_eq!(eth.phase, PhaseKind::Monitoring);
    assert_eq!(eth.direction, Some(Direction::Short));

    let raw: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("positions.json")).unwrap(),
    )
    .unwrap();
    let id = eth.position_id.unwrap();
    assert!(id.starts_with("ETH-"));
    assert_eq!(raw[&id]["direction"], "short");
    assert_eq!(raw[&id]["state"]["phase"], "monitoring");
}

#[tokio::test]
async fn one_symbol_failing_does_not_block_another() {
    let dir = TempDir::new().unwrap();
    let gateway = venue();
    gateway.inject_failure(
        PaperOp::Open,
        GatewayError::UnknownSymbol("BTC".to_string()),
    );
    let alerts = Arc::new(RecordingAlerts::default());
    let orchestrator = build(dir.path(), &["BTC", "ETH"], &gateway, &alerts);

    orchestrator
        .dispatch(&Signal::new("BTC", SignalDirection::Long))
        .await;
    orchestrator
        .dispatch(&Signal::new("DOGE", SignalDirection::Long))
        .await;
    orchestrator
        .dispatch(&Signal::new("ETH", SignalDirection::Short))
        .await;

    assert_eq!(orchestrator.manager("BTC").unwrap().phase(), PhaseKind::Flat);
    assert_eq!(
        orchestrator.manager("ETH").unwrap().phase(),
        PhaseKind::Monitoring
    );
    assert_eq!(gateway.open_calls(), 2);
    assert_eq!(alerts.critical(), 1);

    let status = orchestrator.status();
    assert_eq!(status.managers.len(), 2);
    assert!(status.feed_health.is_none());
}

#[tokio::test]
async fn run_drains_queue_and_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let gateway = venue();
    let alerts = Arc::new(RecordingAlerts::default());
    let orchestrator = build(dir.path(), &["BTC"], &gateway, &alerts);

    orchestrator
        .queue()
        .push(Signal::new("BTC", SignalDirection::Long));
    orchestrator
        .queue()
        .push(Signal::new("DOGE", SignalDirection::Short));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = async {
        let btc = orchestrator.manager("BTC").unwrap();
        for _ in 0..100 {
            if btc.phase() == PhaseKind::Monitoring {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(btc.phase(), PhaseKind::Monitoring);

        // Let the health timer observe the unreachable stream.
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).unwrap();
    };

    let (result, ()) = tokio::join!(orchestrator.run(shutdown_rx), driver);
    result.unwrap();

    assert_eq!(gateway.open_calls(), 1);
    assert!(orchestrator.queue().is_empty());
    assert!(alerts
        .all()
        .iter()
        .any(|a| a.action == "signal-feed" && a.symbol.is_none()));
    assert_eq!(orchestrator.status().feed_health, Some(FeedHealth::Stopped));

    // A second start on the same instance is refused.
    let (_tx, rx) = watch::channel(false);
    assert!(orchestrator.run(rx).await.is_err());
}
