//! WebSocket connection task for the signal stream.
//!
//! ```text
//! SignalFeed::spawn()
//!        │
//!        ├─► Spawns connection task
//!        │   ├─► Sends one subscribe message per (symbol, direction)
//!        │   ├─► Validates events, pushes Signals onto the SignalQueue
//!        │   └─► Publishes FeedHealth on a watch channel
//!        │
//!        └─► Returns SignalFeedHandle (reconnect / shutdown / health)
//! ```
//!
//! Reconnects use a fixed delay. After `max_reconnect_attempts` consecutive
//! failures the task reports [`FeedHealth::Fatal`] and idles until it is told
//! to reconnect or shut down.

use crate::health::FeedHealth;
use crate::message::{InboundMessage, SubscribeMessage};
use crate::queue::SignalQueue;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use perp_guard_core::{Direction, Signal, StreamConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Max reconnection attempts exceeded ({0})")]
    MaxReconnectsExceeded(u32),
}

/// One (symbol, direction) stream the feed subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub symbol: String,
    pub direction: Direction,
}

impl Subscription {
    pub fn new(symbol: impl Into<String>, direction: Direction) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedCommand {
    Reconnect,
    Shutdown,
}

/// How a single connection ended without error.
enum SessionEnd {
    Shutdown,
    Reconnect,
}

pub struct SignalFeed;

impl SignalFeed {
    /// Starts the connection task. The queue is closed when the task exits.
    pub fn spawn(
        config: StreamConfig,
        subscriptions: Vec<Subscription>,
        queue: Arc<SignalQueue>,
    ) -> SignalFeedHandle {
        let (command_tx, command_rx) = mpsc::channel(8);
        let (health_tx, health_rx) = watch::channel(FeedHealth::Connecting);

        let task = tokio::spawn(run_connection_loop(
            config,
            subscriptions,
            Arc::clone(&queue),
            health_tx,
            command_rx,
        ));

        SignalFeedHandle {
            commands: command_tx,
            health: health_rx,
            queue,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        }
    }
}

/// Control surface for a running [`SignalFeed`].
#[derive(Clone)]
pub struct SignalFeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    health: watch::Receiver<FeedHealth>,
    queue: Arc<SignalQueue>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl SignalFeedHandle {
    #[must_use]
    pub fn health(&self) -> FeedHealth {
        self.health.borrow().clone()
    }

    /// Receiver that observes every health transition.
    #[must_use]
    pub fn watch_health(&self) -> watch::Receiver<FeedHealth> {
        self.health.clone()
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<SignalQueue> {
        &self.queue
    }

    /// Drops the current connection (if any) and starts over with a fresh attempt budget.
    pub async fn reconnect(&self) {
        if self.commands.send(FeedCommand::Reconnect).await.is_err() {
            debug!("Signal feed task already stopped, reconnect ignored");
        }
    }

    /// Closes the subscription and waits for the connection task to finish.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(FeedCommand::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Signal feed task ended abnormally");
            }
        }
    }
}

// ============================================================================
// Connection Loop Implementation
// ============================================================================

async fn run_connection_loop(
    config: StreamConfig,
    subscriptions: Vec<Subscription>,
    queue: Arc<SignalQueue>,
    health_tx: watch::Sender<FeedHealth>,
    mut command_rx: mpsc::Receiver<FeedCommand>,
) {
    let known: HashSet<(String, Direction)> = subscriptions
        .iter()
        .map(|s| (s.symbol.clone(), s.direction))
        .collect();
    let mut attempts: u32 = 0;

    loop {
        info!(url = %config.url, "Connecting to signal stream");

        let outcome = connect_and_run(
            &config,
            &subscriptions,
            &known,
            &queue,
            &health_tx,
            &mut command_rx,
            &mut attempts,
        )
        .await;

        let error = match outcome {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Reconnect) => {
                info!("Reconnect requested");
                attempts = 0;
                health_tx.send_replace(FeedHealth::Connecting);
                continue;
            }
            Err(e) => e,
        };

        attempts += 1;
        error!(error = %error, attempt = attempts, "Signal stream connection failed");

        if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
            let fatal = FeedError::MaxReconnectsExceeded(attempts);
            error!(error = %fatal, "Signal stream giving up until reconnect is requested");
            health_tx.send_replace(FeedHealth::Fatal {
                attempts,
                last_error: error.to_string(),
            });
            match command_rx.recv().await {
                Some(FeedCommand::Reconnect) => {
                    attempts = 0;
                    health_tx.send_replace(FeedHealth::Connecting);
                    continue;
                }
                Some(FeedCommand::Shutdown) | None => break,
            }
        }

        health_tx.send_replace(FeedHealth::Reconnecting {
            attempt: attempts,
            last_error: error.to_string(),
        });
        info!(delay = ?config.reconnect_delay(), "Waiting before reconnect");

        tokio::select! {
            () = sleep(config.reconnect_delay()) => {}
            cmd = command_rx.recv() => match cmd {
                Some(FeedCommand::Reconnect) => attempts = 0,
                Some(FeedCommand::Shutdown) | None => break,
            },
        }
    }

    info!("Signal stream stopped");
    health_tx.send_replace(FeedHealth::Stopped);
    queue.close();
}

async fn connect_and_run(
    config: &StreamConfig,
    subscriptions: &[Subscription],
    known: &HashSet<(String, Direction)>,
    queue: &SignalQueue,
    health_tx: &watch::Sender<FeedHealth>,
    command_rx: &mut mpsc::Receiver<FeedCommand>,
    attempts: &mut u32,
) -> Result<SessionEnd, FeedError> {
    let (ws_stream, _response) = connect_async(config.url.as_str())
        .await
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

    info!("Signal stream connected");
    *attempts = 0;

    let (mut write, mut read) = ws_stream.split();

    for sub in subscriptions {
        let json = serde_json::to_string(&SubscribeMessage::new(&sub.symbol, sub.direction))?;
        debug!(message = %json, "Sending subscribe message");
        write.send(Message::Text(json)).await?;
    }

    health_tx.send_replace(FeedHealth::Connected {
        since: Utc::now(),
        symbols: Vec::new(),
    });

    let mut ping_interval =
        tokio::time::interval(config.ping_interval().max(Duration::from_millis(100)));
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let _ = write.close().await;
                return Ok(match cmd {
                    Some(FeedCommand::Reconnect) => SessionEnd::Reconnect,
                    Some(FeedCommand::Shutdown) | None => {
                        info!("Shutdown signal received, closing signal stream");
                        SessionEnd::Shutdown
                    }
                });
            }

            _ = ping_interval.tick() => {
                debug!("Sending ping");
                write.send(Message::Ping(Vec::new())).await?;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_text(&text, known, queue, health_tx),
                    Some(Ok(Message::Binary(data))) => {
                        if let Ok(text) = String::from_utf8(data) {
                            handle_text(&text, known, queue, health_tx);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Received close frame");
                        return Err(FeedError::ConnectionFailed(
                            frame.map_or_else(|| "Connection closed".to_string(), |f| f.reason.to_string()),
                        ));
                    }
                    Some(Err(e)) => return Err(FeedError::WebSocket(e)),
                    None => return Err(FeedError::ConnectionFailed("Stream ended".to_string())),
                }
            }
        }
    }
}

fn handle_text(
    text: &str,
    known: &HashSet<(String, Direction)>,
    queue: &SignalQueue,
    health_tx: &watch::Sender<FeedHealth>,
) {
    let message = match InboundMessage::parse(text) {
        Ok(Some(message)) => message,
        Ok(None) => {
            debug!(message = %text, "Ignoring unrecognised stream message");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Failed to parse stream message");
            return;
        }
    };

    match message {
        InboundMessage::Connection { symbols } => {
            info!(symbols = ?symbols, "Signal stream acknowledged subscriptions");
            health_tx.send_modify(|health| {
                if let FeedHealth::Connected { symbols: acked, .. } = health {
                    *acked = symbols;
                }
            });
        }
        InboundMessage::Signal {
            symbol,
            direction,
            signal,
        } => {
            if !known.contains(&(symbol.clone(), direction)) {
                debug!(symbol = %symbol, direction = %direction, "Dropping signal for unknown subscription");
                return;
            }
            debug!(symbol = %symbol, signal = signal.as_i8(), "Signal received");
            if let Some(evicted) = queue.push(Signal::new(symbol, signal)) {
                warn!(
                    evicted = %evicted.symbol,
                    received_at = %evicted.received_at,
                    "Signal queue full, dropped oldest entry"
                );
            }
        }
    }
}
