use crate::events::{ManagerEvent, ManagerStatus, PhaseKind};
use crate::manager::{ManagerDeps, SymbolManager};
use crate::retry::RetryPolicy;
use crate::snapshot::SnapshotStore;
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use perp_guard_core::{
    Alert, AlertSink, AppConfig, ExecutionGateway, SentimentProvider, SettingsResolver, Signal,
};
use perp_guard_signal_feed::{FeedHealth, SignalFeed, SignalFeedHandle, SignalQueue, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub managers: Vec<ManagerStatus>,
    /// `None` until `run` has started the feed.
    pub feed_health: Option<FeedHealth>,
    pub queue_depth: usize,
    pub dropped_signals: u64,
}

/// Owns one [`SymbolManager`] per configured symbol and the signal feed.
pub struct TradingOrchestrator {
    config: AppConfig,
    managers: BTreeMap<String, Arc<SymbolManager>>,
    queue: Arc<SignalQueue>,
    alerts: Arc<dyn AlertSink>,
    events: broadcast::Sender<ManagerEvent>,
    feed: Mutex<Option<SignalFeedHandle>>,
}

impl TradingOrchestrator {
    /// Builds managers for every configured symbol.
    ///
    /// # Errors
    /// Returns error if no symbols are configured or any symbol's effective
    /// settings are invalid.
    pub fn new(
        config: AppConfig,
        gateway: Arc<dyn ExecutionGateway>,
        sentiment: Arc<dyn SentimentProvider>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        if config.symbols.is_empty() {
            bail!("no symbols configured");
        }
        config
            .defaults
            .validate()
            .context("invalid default settings")?;
        let resolver = SettingsResolver::new(&config.defaults, &config.symbols)?;

        let (events, _) = broadcast::channel(config.orchestrator.event_buffer.max(1));
        let deps = ManagerDeps {
            gateway,
            sentiment,
            alerts: Arc::clone(&alerts),
            retry: RetryPolicy::from_config(&config.retry),
            snapshots: Some(Arc::new(SnapshotStore::open(
                config.orchestrator.snapshot_path.clone(),
            ))),
            events: events.clone(),
        };

        let mut managers = BTreeMap::new();
        for symbol in &config.symbols {
            let settings = resolver
                .resolve(&symbol.symbol)
                .with_context(|| format!("no settings resolved for {}", symbol.symbol))?;
            let manager = SymbolManager::new(
                symbol.symbol.clone(),
                settings,
                symbol.directions.clone(),
                deps.clone(),
            );
            if managers
                .insert(symbol.symbol.clone(), Arc::new(manager))
                .is_some()
            {
                bail!("symbol {} configured twice", symbol.symbol);
            }
        }

        let queue = Arc::new(SignalQueue::new(config.stream.queue_capacity));
        info!(symbols = ?managers.keys().collect::<Vec<_>>(), "Orchestrator initialized");

        Ok(Self {
            config,
            managers,
            queue,
            alerts,
            events,
            feed: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn manager(&self, symbol: &str) -> Option<&Arc<SymbolManager>> {
        self.managers.get(symbol)
    }

    #[must_use]
    pub fn symbols(&self) -> Vec<&str> {
        self.managers.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<SignalQueue> {
        &self.queue
    }

    /// Subscribes to events from every manager.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            managers: self.managers.values().map(|m| m.status()).collect(),
            feed_health: self.feed.lock().as_ref().map(SignalFeedHandle::health),
            queue_depth: self.queue.len(),
            dropped_signals: self.queue.dropped(),
        }
    }

    /// Adopts positions already open on the venue. Returns how many were adopted.
    ///
    /// A symbol that cannot be queried is logged and left flat; its next
    /// signal queries the venue again before opening.
    pub async fn reconcile_all(&self) -> usize {
        let mut adopted = 0;
        for (symbol, manager) in &self.managers {
            match manager.reconcile().await {
                Ok(true) => adopted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Startup reconciliation failed");
                    self.alerts.alert(Alert::warning(
                        Some(symbol.as_str()),
                        "reconcile",
                        e.to_string(),
                    ));
                }
            }
        }
        info!(adopted, symbols = self.managers.len(), "Startup reconciliation complete");
        adopted
    }

    /// Routes one signal to its manager. Errors are logged, never propagated.
    pub async fn dispatch(&self, signal: &Signal) {
        let Some(manager) = self.managers.get(&signal.symbol) else {
            debug!(symbol = %signal.symbol, "No manager for symbol, dropping signal");
            return;
        };
        if let Err(e) = manager.process_signal(signal).await {
            error!(symbol = %signal.symbol, direction = ?signal.direction, error = %e, "Signal processing failed");
        }
    }

    /// Runs until `shutdown` flips to true.
    ///
    /// Reconciles, starts the feed, the monitoring loops and the health
    /// timer, then drains the signal queue on this task. In-flight actions
    /// are not awaited past shutdown; the next start reconciles.
    ///
    /// # Errors
    /// Returns error if the orchestrator is already running.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.feed.lock().is_some() {
            bail!("orchestrator already running");
        }
        self.reconcile_all().await;

        let subscriptions: Vec<Subscription> = self
            .managers
            .values()
            .flat_map(|m| {
                m.directions()
                    .iter()
                    .map(|d| Subscription::new(m.symbol(), *d))
                    .collect::<Vec<_>>()
            })
            .collect();
        let feed = SignalFeed::spawn(
            self.config.stream.clone(),
            subscriptions,
            Arc::clone(&self.queue),
        );
        *self.feed.lock() = Some(feed.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let monitors: Vec<JoinHandle<()>> = self
            .managers
            .values()
            .map(|m| m.spawn_monitor(stop_rx.clone()))
            .collect();
        let health = self.spawn_health_check(feed.clone(), stop_rx);

        info!(url = %self.config.stream.url, "Orchestrator running");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }
                signal = self.queue.pop() => match signal {
                    Some(signal) => self.dispatch(&signal).await,
                    None => {
                        warn!("Signal queue closed");
                        break;
                    }
                },
            }
        }

        let _ = stop_tx.send(true);
        feed.shutdown().await;
        for handle in monitors {
            if let Err(e) = handle.await {
                warn!(error = %e, "Monitoring task ended abnormally");
            }
        }
        if let Err(e) = health.await {
            warn!(error = %e, "Health check task ended abnormally");
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    fn spawn_health_check(
        &self,
        feed: SignalFeedHandle,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = self
            .config
            .orchestrator
            .health_check_interval()
            .max(MIN_HEALTH_INTERVAL);
        let alerts = Arc::clone(&self.alerts);
        let managers: Vec<Arc<SymbolManager>> = self.managers.values().cloned().collect();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut fatal_reported = false;

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        check_health(&feed, alerts.as_ref(), &managers, &mut fatal_reported).await;
                    }
                }
            }
        })
    }
}

async fn check_health(
    feed: &SignalFeedHandle,
    alerts: &dyn AlertSink,
    managers: &[Arc<SymbolManager>],
    fatal_reported: &mut bool,
) {
    let health = feed.health();
    let monitoring = managers
        .iter()
        .filter(|m| m.phase() == PhaseKind::Monitoring)
        .count();
    info!(
        feed = health.label(),
        queue_depth = feed.queue().len(),
        dropped_signals = feed.queue().dropped(),
        monitoring,
        "Health check"
    );

    match health {
        FeedHealth::Connected { .. } => *fatal_reported = false,
        FeedHealth::Fatal { attempts, last_error } => {
            if !*fatal_reported {
                alerts.alert(Alert::critical(
                    None,
                    "signal-feed",
                    format!("gave up after {attempts} attempts: {last_error}"),
                ));
                *fatal_reported = true;
            }
            warn!(attempts, "Signal feed down, requesting reconnect");
            feed.reconnect().await;
        }
        FeedHealth::Connecting | FeedHealth::Reconnecting { .. } | FeedHealth::Stopped => {}
    }
}
