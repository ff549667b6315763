#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use perp_guard_core::{
    AccountState, Alert, AlertSeverity, AlertSink, Direction, ExecutionGateway, GatewayError,
    Position, Settings,
};
use perp_guard_hyperliquid::PaperGateway;
use perp_guard_orchestrator::{ManagerDeps, ManagerEvent, RetryPolicy, SymbolManager};
use perp_guard_sentiment::StaticSentiment;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn all(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn critical(&self) -> usize {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.severity == AlertSeverity::Critical)
            .count()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Paper venue with scripted misbehaviour on top.
///
/// Lost acknowledgements fill the order and then report a timeout. A
/// stalled query reads the position, then waits for `release` before
/// returning that (possibly outdated) read.
pub struct ScriptedVenue {
    pub paper: Arc<PaperGateway>,
    lost_open_acks: AtomicU32,
    stall: Mutex<Option<Arc<Notify>>>,
    stalled: Notify,
}

impl ScriptedVenue {
    pub fn new(paper: Arc<PaperGateway>) -> Self {
        Self {
            paper,
            lost_open_acks: AtomicU32::new(0),
            stall: Mutex::new(None),
            stalled: Notify::new(),
        }
    }

    pub fn lose_open_acks(&self, count: u32) {
        self.lost_open_acks.store(count, Ordering::SeqCst);
    }

    /// Stalls the next `get_position`; notify the returned handle to release it.
    pub fn stall_next_query(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.stall.lock() = Some(release.clone());
        release
    }

    /// Resolves once a stalled query has taken its read.
    pub async fn query_stalled(&self) {
        self.stalled.notified().await;
    }
}

#[async_trait]
impl ExecutionGateway for ScriptedVenue {
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        let read = self.paper.get_position(symbol).await;
        let stall = self.stall.lock().take();
        if let Some(release) = stall {
            self.stalled.notify_one();
            release.notified().await;
        }
        read
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.paper.get_mark_price(symbol).await
    }

    async fn account_state(&self) -> Result<AccountState, GatewayError> {
        self.paper.account_state().await
    }

    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        leverage: u32,
    ) -> Result<String, GatewayError> {
        let tx = self.paper.open_position(symbol, direction, leverage).await?;
        let lost = self
            .lost_open_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(GatewayError::Timeout(format!("no response for {tx}")));
        }
        Ok(tx)
    }

    async fn close_position(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<String, GatewayError> {
        self.paper.close_position(symbol, direction).await
    }
}

pub fn settings() -> Settings {
    Settings {
        confirmation_hit_count: 2,
        monitor_interval_ms: 1_000,
        post_action_settle_ms: 3_000,
        ..Settings::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
    }
}

pub struct Harness {
    pub gateway: Arc<PaperGateway>,
    pub venue: Arc<ScriptedVenue>,
    pub sentiment: Arc<StaticSentiment>,
    pub alerts: Arc<RecordingAlerts>,
    pub manager: Arc<SymbolManager>,
    pub events: broadcast::Receiver<ManagerEvent>,
}

impl Harness {
    /// BTC manager on a 1000 balance paper venue with the mark at 100.
    pub fn new() -> Self {
        Self::with_directions(vec![Direction::Long, Direction::Short])
    }

    pub fn with_directions(directions: Vec<Direction>) -> Self {
        let gateway = Arc::new(PaperGateway::new(dec!(1000), dec!(0.25)));
        gateway.set_mark("BTC", dec!(100));
        let venue = Arc::new(ScriptedVenue::new(gateway.clone()));
        let sentiment = Arc::new(StaticSentiment::from_index(50));
        let alerts = Arc::new(RecordingAlerts::default());
        let (events_tx, events) = broadcast::channel(64);

        let deps = ManagerDeps {
            gateway: venue.clone(),
            sentiment: sentiment.clone(),
            alerts: alerts.clone(),
            retry: fast_retry(),
            snapshots: None,
            events: events_tx,
        };
        let manager = Arc::new(SymbolManager::new("BTC", settings(), directions, deps));

        Self {
            gateway,
            venue,
            sentiment,
            alerts,
            manager,
            events,
        }
    }

    /// Every event published so far.
    pub fn drain_events(&mut self) -> Vec<ManagerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
