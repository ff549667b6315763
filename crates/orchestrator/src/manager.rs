//! Per-symbol position manager.
//!
//! A manager owns the lifecycle of at most one position: `Flat` until a
//! signal passes the sentiment gate, `Opening` while the open is verified,
//! `Monitoring` while the risk tracker evaluates ticks, and `Closing` while a
//! close is verified. Once monitoring starts, entry data and settings are
//! fixed until the position is gone.

use crate::actions::{close_and_verify, open_and_verify, ActionError, ActionKind};
use crate::events::{ManagerEvent, ManagerStatus, PhaseKind};
use crate::retry::RetryPolicy;
use crate::snapshot::{position_id, PositionSnapshot, SnapshotError, SnapshotStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use perp_guard_core::{
    Alert, AlertSink, Direction, ExecutionGateway, Position, SentimentProvider, Settings, Signal,
};
use perp_guard_risk::{PositionEntry, ProtectionLevels, RiskTracker, TrailingUpdate};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const RECENT_EVENTS: usize = 10;

/// Shared collaborators handed to every manager.
#[derive(Clone)]
pub struct ManagerDeps {
    pub gateway: Arc<dyn ExecutionGateway>,
    pub sentiment: Arc<dyn SentimentProvider>,
    pub alerts: Arc<dyn AlertSink>,
    pub retry: RetryPolicy,
    pub snapshots: Option<Arc<SnapshotStore>>,
    pub events: broadcast::Sender<ManagerEvent>,
}

/// Result of a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Venue confirmed flat. P&L is `None` when the balance could not be read.
    Closed { realized_pnl: Option<Decimal> },
    /// Another close is in flight; nothing was sent.
    AlreadyClosing,
    /// No monitored position to close.
    NotOpen,
}

#[derive(Debug, Clone)]
struct Tracked {
    /// Bumped on every adoption so an in-flight tick can tell its read is stale.
    generation: u64,
    position_id: String,
    opened_at: DateTime<Utc>,
    levels: ProtectionLevels,
    tracker: RiskTracker,
}

#[derive(Debug)]
enum Phase {
    Flat,
    Opening { direction: Direction },
    Monitoring(Box<Tracked>),
    Closing(Box<Tracked>),
}

impl Phase {
    const fn kind(&self) -> PhaseKind {
        match self {
            Self::Flat => PhaseKind::Flat,
            Self::Opening { .. } => PhaseKind::Opening,
            Self::Monitoring(_) => PhaseKind::Monitoring,
            Self::Closing(_) => PhaseKind::Closing,
        }
    }
}

/// Holds the closing flag; releases it on drop, including on early return.
struct ClosingGuard<'a>(&'a AtomicBool);

impl<'a> ClosingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adoption {
    Opened,
    Reconciled,
}

pub struct SymbolManager {
    symbol: String,
    settings: Settings,
    directions: Vec<Direction>,
    deps: ManagerDeps,
    phase: Mutex<Phase>,
    closing: AtomicBool,
    /// Set when a position exists on the venue but could not be seeded yet.
    reconcile_pending: AtomicBool,
    generations: AtomicU64,
    last_close_reason: Mutex<Option<String>>,
    realized_pnl: Mutex<Decimal>,
    recent_events: Mutex<VecDeque<ManagerEvent>>,
}

impl SymbolManager {
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        settings: Settings,
        directions: Vec<Direction>,
        deps: ManagerDeps,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            settings,
            directions,
            deps,
            phase: Mutex::new(Phase::Flat),
            closing: AtomicBool::new(false),
            reconcile_pending: AtomicBool::new(false),
            generations: AtomicU64::new(0),
            last_close_reason: Mutex::new(None),
            realized_pnl: Mutex::new(Decimal::ZERO),
            recent_events: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS)),
        }
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    #[must_use]
    pub fn phase(&self) -> PhaseKind {
        self.phase.lock().kind()
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.deps.events.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        let (phase, direction, tracked) = {
            let phase = self.phase.lock();
            match &*phase {
                Phase::Flat => (PhaseKind::Flat, None, None),
                Phase::Opening { direction } => (PhaseKind::Opening, Some(*direction), None),
                Phase::Monitoring(t) => (
                    PhaseKind::Monitoring,
                    Some(t.tracker.direction()),
                    Some(t.clone()),
                ),
                Phase::Closing(t) => (
                    PhaseKind::Closing,
                    Some(t.tracker.direction()),
                    Some(t.clone()),
                ),
            }
        };

        ManagerStatus {
            symbol: self.symbol.clone(),
            phase,
            direction,
            position_id: tracked.as_ref().map(|t| t.position_id.clone()),
            opened_at: tracked.as_ref().map(|t| t.opened_at),
            entry_price: tracked.as_ref().map(|t| t.tracker.entry().entry_price),
            entry_balance: tracked.as_ref().map(|t| t.tracker.entry().entry_balance),
            levels: tracked.as_ref().map(|t| t.levels),
            risk: tracked.as_ref().map(|t| t.tracker.snapshot()),
            is_closing: self.is_closing(),
            last_close_reason: self.last_close_reason.lock().clone(),
            realized_pnl: *self.realized_pnl.lock(),
            recent_events: self.recent_events.lock().iter().cloned().collect(),
        }
    }

    /// Handles one stream signal.
    ///
    /// Signals arriving while an open or close is in flight are dropped.
    ///
    /// # Errors
    /// Returns the action error when an open or a sentiment-forced close fails.
    pub async fn process_signal(&self, signal: &Signal) -> Result<(), ActionError> {
        if signal.symbol != self.symbol {
            debug!(symbol = %self.symbol, signal_symbol = %signal.symbol, "Ignoring signal for another symbol");
            return Ok(());
        }

        let held = match &*self.phase.lock() {
            Phase::Flat => None,
            Phase::Monitoring(t) => Some(t.tracker.direction()),
            busy => {
                debug!(symbol = %self.symbol, phase = ?busy.kind(), "Busy, dropping signal");
                return Ok(());
            }
        };

        match held {
            None => self.on_signal_while_flat(signal).await,
            Some(held) => self.on_signal_while_monitoring(signal, held).await,
        }
    }

    async fn on_signal_while_flat(&self, signal: &Signal) -> Result<(), ActionError> {
        let Some(direction) = signal.direction.actionable() else {
            debug!(symbol = %self.symbol, "Neutral signal while flat");
            return Ok(());
        };
        if !self.directions.contains(&direction) {
            self.reject(signal, format!("{direction} entries are not enabled"));
            return Ok(());
        }

        // The venue may already hold a position this process does not know about.
        if let Some(position) = self.query_position().await? {
            info!(symbol = %self.symbol, direction = %position.direction, "Venue already holds a position, adopting it");
            return self.adopt(position, Adoption::Reconciled).await;
        }

        let sentiment = self.deps.sentiment.get_sentiment().await;
        if !sentiment.permits(direction) {
            self.reject(
                signal,
                format!(
                    "sentiment {:?} ({}) blocks {direction} entries",
                    sentiment.category, sentiment.index
                ),
            );
            return Ok(());
        }

        self.open(direction).await
    }

    async fn on_signal_while_monitoring(
        &self,
        signal: &Signal,
        held: Direction,
    ) -> Result<(), ActionError> {
        let sentiment = self.deps.sentiment.get_sentiment().await;
        if !sentiment.is_extreme_against(held) {
            debug!(symbol = %self.symbol, held = %held, signal = ?signal.direction, "Holding position");
            return Ok(());
        }

        let reason = format!(
            "sentiment {:?} ({}) against {held} position",
            sentiment.category, sentiment.index
        );
        warn!(symbol = %self.symbol, reason = %reason, "Forcing close on sentiment");
        let outcome = self.close(reason).await?;
        if !matches!(outcome, CloseOutcome::Closed { .. }) {
            return Ok(());
        }

        let Some(bias) = sentiment.category.extreme_bias() else {
            return Ok(());
        };
        if signal.direction.actionable() == Some(bias)
            && sentiment.permits(bias)
            && self.directions.contains(&bias)
        {
            info!(symbol = %self.symbol, direction = %bias, "Signal agrees with sentiment, reversing");
            return self.open(bias).await;
        }
        Ok(())
    }

    async fn open(&self, direction: Direction) -> Result<(), ActionError> {
        {
            let mut phase = self.phase.lock();
            if !matches!(*phase, Phase::Flat) {
                return Ok(());
            }
            *phase = Phase::Opening { direction };
        }
        self.emit(ManagerEvent::SignalAccepted {
            symbol: self.symbol.clone(),
            direction,
        });
        info!(symbol = %self.symbol, direction = %direction, leverage = self.settings.leverage_multiplier, "Opening position");

        let result = open_and_verify(
            self.deps.gateway.as_ref(),
            &self.deps.retry,
            &self.symbol,
            direction,
            self.settings.leverage_multiplier,
            self.settings.settle_delay(),
        )
        .await;

        match result {
            Ok(position) => self.adopt(position, Adoption::Opened).await,
            Err(e) => {
                *self.phase.lock() = Phase::Flat;
                error!(symbol = %self.symbol, direction = %direction, error = %e, "Open failed");
                self.report_failure(&e);
                self.emit(ManagerEvent::OpenFailed {
                    symbol: self.symbol.clone(),
                    direction,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Seeds monitoring from a venue position.
    ///
    /// Entry balance is read once here and never again for this position.
    async fn adopt(&self, position: Position, how: Adoption) -> Result<(), ActionError> {
        let account = {
            let gateway = self.deps.gateway.as_ref();
            self.deps
                .retry
                .run(&self.symbol, ActionKind::Query, move || gateway.account_state())
                .await
        };
        let account = match account {
            Ok(account) => account,
            Err(e) => {
                *self.phase.lock() = Phase::Flat;
                self.reconcile_pending.store(true, Ordering::Release);
                warn!(symbol = %self.symbol, error = %e, "Could not read balance, will reconcile on next tick");
                return Err(e);
            }
        };

        let entry = PositionEntry::observe(&position, account.balance);
        let levels = ProtectionLevels::derive(position.entry_price, position.direction, &self.settings);
        let opened_at = Utc::now();
        let tracked = Tracked {
            generation: self.generations.fetch_add(1, Ordering::AcqRel) + 1,
            position_id: position_id(&self.symbol, opened_at),
            opened_at,
            levels,
            tracker: RiskTracker::new(entry, self.settings),
        };
        let id = tracked.position_id.clone();
        let snapshot = self.snapshot_of(&tracked, PhaseKind::Monitoring);

        {
            let mut phase = self.phase.lock();
            if matches!(*phase, Phase::Monitoring(_) | Phase::Closing(_)) {
                debug!(symbol = %self.symbol, "Already monitoring, skipping adoption");
                return Ok(());
            }
            *phase = Phase::Monitoring(Box::new(tracked));
        }
        self.reconcile_pending.store(false, Ordering::Release);

        let symbol = self.symbol.clone();
        self.persist("write", move |store| {
            store
                .retain_symbol(&symbol, None)
                .and_then(|()| store.upsert(&id, snapshot))
        })
        .await;

        info!(
            symbol = %self.symbol,
            direction = %position.direction,
            entry_price = %position.entry_price,
            size = %position.size,
            entry_balance = %entry.entry_balance,
            take_profit = %levels.take_profit_price,
            stop_loss = %levels.stop_loss_price,
            "Monitoring position"
        );
        self.emit(match how {
            Adoption::Opened => ManagerEvent::PositionOpened {
                symbol: self.symbol.clone(),
                direction: position.direction,
                entry_price: position.entry_price,
                size: position.size,
                entry_balance: entry.entry_balance,
                levels,
            },
            Adoption::Reconciled => ManagerEvent::Reconciled {
                symbol: self.symbol.clone(),
                direction: position.direction,
                entry_price: position.entry_price,
                size: position.size,
            },
        });
        Ok(())
    }

    /// Adopts a venue position when flat. Returns `true` if one was adopted.
    ///
    /// # Errors
    /// Returns error if the venue cannot be queried.
    pub async fn reconcile(&self) -> Result<bool, ActionError> {
        if self.phase() != PhaseKind::Flat {
            return Ok(false);
        }
        match self.query_position().await? {
            Some(position) => {
                self.adopt(position, Adoption::Reconciled).await?;
                Ok(self.phase() == PhaseKind::Monitoring)
            }
            None => {
                self.reconcile_pending.store(false, Ordering::Release);
                let symbol = self.symbol.clone();
                self.persist("prune", move |store| store.retain_symbol(&symbol, None))
                    .await;
                debug!(symbol = %self.symbol, "Venue flat, nothing to reconcile");
                Ok(false)
            }
        }
    }

    /// Closes the monitored position and waits for the venue to confirm.
    ///
    /// At most one close runs at a time; a concurrent request returns
    /// `AlreadyClosing` without touching the venue.
    ///
    /// # Errors
    /// Returns the action error when the close could not be confirmed. The
    /// manager keeps monitoring in that case.
    pub async fn close(&self, reason: impl Into<String>) -> Result<CloseOutcome, ActionError> {
        let reason = reason.into();
        let Some(_guard) = ClosingGuard::acquire(&self.closing) else {
            debug!(symbol = %self.symbol, "Close already in progress");
            return Ok(CloseOutcome::AlreadyClosing);
        };

        let tracked = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Flat) {
                Phase::Monitoring(t) => {
                    *phase = Phase::Closing(t.clone());
                    t
                }
                other => {
                    *phase = other;
                    return Ok(CloseOutcome::NotOpen);
                }
            }
        };
        let direction = tracked.tracker.direction();

        self.emit(ManagerEvent::CloseTriggered {
            symbol: self.symbol.clone(),
            reason: reason.clone(),
        });
        info!(symbol = %self.symbol, direction = %direction, reason = %reason, "Closing position");

        let result = close_and_verify(
            self.deps.gateway.as_ref(),
            &self.deps.retry,
            &self.symbol,
            direction,
            self.settings.settle_delay(),
        )
        .await;

        match result {
            Ok(()) => {
                let realized_pnl = self.finish(&tracked, reason).await;
                Ok(CloseOutcome::Closed { realized_pnl })
            }
            Err(e) => {
                *self.phase.lock() = Phase::Monitoring(tracked);
                error!(symbol = %self.symbol, error = %e, "Close failed, resuming monitoring");
                self.report_failure(&e);
                self.emit(ManagerEvent::CloseFailed {
                    symbol: self.symbol.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Records a confirmed close and returns to flat.
    async fn finish(&self, tracked: &Tracked, reason: String) -> Option<Decimal> {
        let entry_balance = tracked.tracker.entry().entry_balance;
        let realized_pnl = match self.deps.gateway.account_state().await {
            Ok(account) => Some(account.balance - entry_balance),
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Could not read balance after close");
                None
            }
        };

        *self.phase.lock() = Phase::Flat;
        if let Some(pnl) = realized_pnl {
            *self.realized_pnl.lock() += pnl;
        }
        *self.last_close_reason.lock() = Some(reason.clone());
        let id = tracked.position_id.clone();
        self.persist("remove", move |store| store.remove(&id)).await;

        info!(
            symbol = %self.symbol,
            position_id = %tracked.position_id,
            reason = %reason,
            realized_pnl = ?realized_pnl,
            "Position closed"
        );
        self.emit(ManagerEvent::PositionClosed {
            symbol: self.symbol.clone(),
            direction: tracked.tracker.direction(),
            reason,
            realized_pnl,
        });
        realized_pnl
    }

    /// One monitoring iteration: read the venue, feed the tracker, act on a trigger.
    ///
    /// # Errors
    /// Returns error if the venue cannot be queried or a triggered close fails.
    pub async fn tick(&self) -> Result<(), ActionError> {
        if self.is_closing() {
            return Ok(());
        }
        let generation = match &*self.phase.lock() {
            Phase::Monitoring(t) => Some(t.generation),
            Phase::Flat => None,
            _ => return Ok(()),
        };
        let Some(generation) = generation else {
            if self.reconcile_pending.load(Ordering::Acquire) {
                self.reconcile().await?;
            }
            return Ok(());
        };

        let Some(position) = self.query_position().await? else {
            return self.on_position_gone(generation).await;
        };

        let (outcome, id, snapshot) = {
            let mut phase = self.phase.lock();
            let Phase::Monitoring(tracked) = &mut *phase else {
                return Ok(());
            };
            if tracked.generation != generation {
                debug!(symbol = %self.symbol, "Position re-seeded during tick, discarding read");
                return Ok(());
            }
            if tracked.tracker.direction() == position.direction {
                let outcome = tracked.tracker.on_tick(position.mark_price);
                (
                    Some(outcome),
                    tracked.position_id.clone(),
                    Some(self.snapshot_of(tracked, PhaseKind::Monitoring)),
                )
            } else {
                *phase = Phase::Flat;
                (None, String::new(), None)
            }
        };

        let Some(outcome) = outcome else {
            // Seed from a fresh read, not the one taken before the lock.
            warn!(symbol = %self.symbol, direction = %position.direction, "Venue position flipped, re-seeding");
            self.reconcile().await?;
            return Ok(());
        };

        if let Some(snapshot) = snapshot {
            self.persist("update", move |store| store.upsert(&id, snapshot))
                .await;
        }

        match outcome.trailing {
            Some(TrailingUpdate::Activated { stop_price, progress_pct }) => {
                info!(symbol = %self.symbol, stop_price = %stop_price, progress_pct = %progress_pct, "Trailing stop activated");
                self.emit(ManagerEvent::TrailingActivated {
                    symbol: self.symbol.clone(),
                    stop_price,
                    progress_pct,
                });
            }
            Some(TrailingUpdate::Ratcheted { from, to }) => {
                debug!(symbol = %self.symbol, from = %from, to = %to, "Trailing stop ratcheted");
                self.emit(ManagerEvent::TrailingRatcheted {
                    symbol: self.symbol.clone(),
                    from,
                    to,
                });
            }
            None => {}
        }

        match (outcome.trigger, outcome.pending) {
            (Some(trigger), _) => {
                let reason = trigger.reason();
                warn!(symbol = %self.symbol, reason = %reason, "Close condition confirmed");
                self.close(reason).await?;
            }
            (None, Some((condition, hits))) => {
                debug!(
                    symbol = %self.symbol,
                    condition = %condition,
                    hits,
                    required = self.settings.confirmation_hit_count,
                    progress_pct = %outcome.progress_pct,
                    "Close condition pending"
                );
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// The venue no longer holds the position: closed or liquidated elsewhere.
    async fn on_position_gone(&self, generation: u64) -> Result<(), ActionError> {
        let Some(_guard) = ClosingGuard::acquire(&self.closing) else {
            return Ok(());
        };
        let tracked = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Flat) {
                Phase::Monitoring(t) if t.generation == generation => t,
                other => {
                    *phase = other;
                    return Ok(());
                }
            }
        };
        warn!(symbol = %self.symbol, position_id = %tracked.position_id, "Position closed outside this process");
        self.deps.alerts.alert(Alert::warning(
            Some(self.symbol.as_str()),
            "monitor",
            "position disappeared from venue",
        ));
        self.finish(&tracked, "position no longer on venue".to_string())
            .await;
        Ok(())
    }

    /// Runs `tick` every monitor interval until `shutdown` flips to true.
    pub fn spawn_monitor(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.settings.monitor_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                symbol = %manager.symbol,
                interval_ms = manager.settings.monitor_interval_ms,
                "Monitoring loop started"
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = manager.tick().await {
                            warn!(symbol = %manager.symbol, error = %e, "Monitoring tick failed");
                        }
                    }
                }
            }
            info!(symbol = %manager.symbol, "Monitoring loop stopped");
        })
    }

    async fn query_position(&self) -> Result<Option<Position>, ActionError> {
        let gateway = self.deps.gateway.as_ref();
        let symbol = self.symbol.as_str();
        self.deps
            .retry
            .run(symbol, ActionKind::Query, move || gateway.get_position(symbol))
            .await
    }

    /// Runs a snapshot file rewrite on the blocking pool.
    async fn persist<F>(&self, what: &'static str, write: F)
    where
        F: FnOnce(&SnapshotStore) -> Result<(), SnapshotError> + Send + 'static,
    {
        let Some(store) = self.deps.snapshots.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || write(&store)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(symbol = %self.symbol, error = %e, "Failed to {what} position snapshot");
            }
            Err(e) => warn!(symbol = %self.symbol, error = %e, "Snapshot task failed"),
        }
    }

    fn snapshot_of(&self, tracked: &Tracked, phase: PhaseKind) -> PositionSnapshot {
        let entry = tracked.tracker.entry();
        PositionSnapshot::new(
            &self.symbol,
            entry.direction,
            tracked.opened_at,
            entry.entry_price,
            entry.size,
            entry.entry_balance,
            tracked.levels,
            phase,
            &tracked.tracker.snapshot(),
        )
    }

    fn reject(&self, signal: &Signal, reason: String) {
        info!(symbol = %self.symbol, signal = ?signal.direction, reason = %reason, "Signal rejected");
        self.emit(ManagerEvent::SignalRejected {
            symbol: self.symbol.clone(),
            direction: signal.direction,
            reason,
        });
    }

    fn report_failure(&self, err: &ActionError) {
        if err.is_structural() {
            self.deps.alerts.alert(Alert::critical(
                Some(self.symbol.as_str()),
                err.action().to_string(),
                err.to_string(),
            ));
        }
    }

    fn emit(&self, event: ManagerEvent) {
        {
            let mut recent = self.recent_events.lock();
            if recent.len() == RECENT_EVENTS {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        // No subscribers is fine
        let _ = self.deps.events.send(event);
    }
}
