mod common;

use common::Harness;
use perp_guard_core::{AlertSeverity, Direction, ExecutionGateway, GatewayError, Signal, SignalDirection};
use perp_guard_hyperliquid::PaperOp;
use perp_guard_orchestrator::{ActionError, CloseOutcome, ManagerEvent, PhaseKind};
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::watch;

fn long() -> Signal {
    Signal::new("BTC", SignalDirection::Long)
}

fn short() -> Signal {
    Signal::new("BTC", SignalDirection::Short)
}

#[tokio::test(start_paused = true)]
async fn long_signal_opens_and_seeds_monitoring() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    let status = h.manager.status();
    assert_eq!(status.direction, Some(Direction::Long));
    assert_eq!(status.entry_price, Some(dec!(100)));
    assert_eq!(status.entry_balance, Some(dec!(1000)));
    let levels = status.levels.unwrap();
    assert_eq!(levels.take_profit_price, dec!(103.6));
    assert_eq!(levels.stop_loss_price, dec!(98.2));

    let events = h.drain_events();
    assert!(matches!(events[0], ManagerEvent::SignalAccepted { direction: Direction::Long, .. }));
    assert!(matches!(
        events[1],
        ManagerEvent::PositionOpened { size, .. } if size == dec!(25)
    ));
}

#[tokio::test(start_paused = true)]
async fn extreme_fear_blocks_long_entry() {
    let mut h = Harness::new();
    h.sentiment.set_index(10);

    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.gateway.open_calls(), 0);
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    let events = h.drain_events();
    assert!(matches!(
        &events[..],
        [ManagerEvent::SignalRejected { direction: SignalDirection::Long, .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn disabled_direction_is_rejected() {
    let h = Harness::with_directions(vec![Direction::Long]);
    h.manager.process_signal(&short()).await.unwrap();
    assert_eq!(h.gateway.open_calls(), 0);
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
}

#[tokio::test(start_paused = true)]
async fn neutral_signal_while_flat_does_nothing() {
    let mut h = Harness::new();
    h.manager
        .process_signal(&Signal::new("BTC", SignalDirection::Neutral))
        .await
        .unwrap();
    assert_eq!(h.gateway.open_calls(), 0);
    assert!(h.drain_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unfilled_open_returns_to_flat() {
    let mut h = Harness::new();
    h.gateway.leave_unfilled(1);

    let err = h.manager.process_signal(&long()).await.unwrap_err();

    assert!(matches!(err, ActionError::VerificationFailed { .. }));
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, ManagerEvent::OpenFailed { .. })));
    // Verification failures are not paged.
    assert_eq!(h.alerts.critical(), 0);
}

#[tokio::test(start_paused = true)]
async fn structural_open_failure_pages_once() {
    let h = Harness::new();
    h.gateway.inject_failure(
        PaperOp::Open,
        GatewayError::InsufficientMargin {
            required: dec!(500),
            available: dec!(10),
        },
    );

    let err = h.manager.process_signal(&long()).await.unwrap_err();

    assert!(err.is_structural());
    assert_eq!(h.gateway.open_calls(), 1);
    let alerts = h.alerts.all();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(alerts[0].symbol.as_deref(), Some("BTC"));
}

#[tokio::test(start_paused = true)]
async fn transient_open_failures_are_retried() {
    let h = Harness::new();
    h.gateway.inject_failure(PaperOp::Open, GatewayError::network("reset"));
    h.gateway.inject_failure(PaperOp::Open, GatewayError::Timeout("slow".into()));

    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.gateway.open_calls(), 3);
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
}

#[tokio::test(start_paused = true)]
async fn stop_loss_closes_after_confirmation_ticks() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    // 25 units, 1000 balance: mark 99 is -2.5% of balance.
    h.gateway.set_mark("BTC", dec!(99));
    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert_eq!(h.gateway.close_calls(), 0);

    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    assert_eq!(h.gateway.close_calls(), 1);

    let status = h.manager.status();
    assert!(status.last_close_reason.unwrap().starts_with("stop-loss"));
    assert_eq!(status.realized_pnl, dec!(-25));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        ManagerEvent::PositionClosed { realized_pnl: Some(pnl), .. } if *pnl == dec!(-25)
    )));
}

#[tokio::test(start_paused = true)]
async fn recovered_condition_does_not_close() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    h.gateway.set_mark("BTC", dec!(99));
    h.manager.tick().await.unwrap();
    h.gateway.set_mark("BTC", dec!(100));
    h.manager.tick().await.unwrap();
    h.gateway.set_mark("BTC", dec!(99));
    h.manager.tick().await.unwrap();

    assert_eq!(h.gateway.close_calls(), 0);
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert_eq!(h.manager.status().risk.unwrap().hits.stop_loss, 1);
}

#[tokio::test(start_paused = true)]
async fn extreme_fear_forces_close_of_long_and_reverses_on_short_signal() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    // In profit; the sentiment close ignores progress.
    h.gateway.set_mark("BTC", dec!(101));
    h.sentiment.set_index(10);

    h.manager.process_signal(&short()).await.unwrap();

    assert_eq!(h.gateway.close_calls(), 1);
    assert_eq!(h.gateway.open_calls(), 2);
    let position = h.gateway.get_position("BTC").await.unwrap().unwrap();
    assert_eq!(position.direction, Direction::Short);
    assert_eq!(h.manager.status().direction, Some(Direction::Short));

    let events = h.drain_events();
    let reason = events.iter().find_map(|e| match e {
        ManagerEvent::PositionClosed { reason, .. } => Some(reason.clone()),
        _ => None,
    });
    assert!(reason.unwrap().contains("ExtremeFear"));
}

#[tokio::test(start_paused = true)]
async fn extreme_fear_close_without_agreeing_signal_stays_flat() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    h.sentiment.set_index(5);

    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.gateway.close_calls(), 1);
    assert_eq!(h.gateway.open_calls(), 1);
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
}

#[tokio::test(start_paused = true)]
async fn signals_while_monitoring_are_ignored_without_extreme_sentiment() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    h.manager.process_signal(&short()).await.unwrap();
    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.gateway.open_calls(), 1);
    assert_eq!(h.gateway.close_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_closes_send_one_order() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    let (first, second) = tokio::join!(h.manager.close("first"), h.manager.close("second"));

    assert!(matches!(first.unwrap(), CloseOutcome::Closed { .. }));
    assert_eq!(second.unwrap(), CloseOutcome::AlreadyClosing);
    assert_eq!(h.gateway.close_calls(), 1);
    assert!(!h.manager.is_closing());
}

#[tokio::test(start_paused = true)]
async fn close_when_flat_is_not_open() {
    let h = Harness::new();
    assert_eq!(h.manager.close("manual").await.unwrap(), CloseOutcome::NotOpen);
    assert_eq!(h.gateway.close_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_close_resumes_monitoring() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    h.gateway.leave_unfilled(1);

    let err = h.manager.close("manual").await.unwrap_err();

    assert!(matches!(err, ActionError::VerificationFailed { .. }));
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert!(!h.manager.is_closing());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, ManagerEvent::CloseFailed { .. })));

    // The next attempt goes through.
    assert!(matches!(
        h.manager.close("manual").await.unwrap(),
        CloseOutcome::Closed { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn reconcile_adopts_existing_position() {
    let mut h = Harness::new();
    h.gateway.seed_position("BTC", dec!(-2), dec!(100));

    assert!(h.manager.reconcile().await.unwrap());

    let status = h.manager.status();
    assert_eq!(status.phase, PhaseKind::Monitoring);
    assert_eq!(status.direction, Some(Direction::Short));
    assert_eq!(status.entry_balance, Some(dec!(1000)));
    assert!(matches!(
        &h.drain_events()[..],
        [ManagerEvent::Reconciled { direction: Direction::Short, .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn reconcile_when_venue_is_flat_stays_flat() {
    let h = Harness::new();
    assert!(!h.manager.reconcile().await.unwrap());
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
}

#[tokio::test(start_paused = true)]
async fn flat_manager_adopts_unknown_position_instead_of_opening() {
    let h = Harness::new();
    h.gateway.seed_position("BTC", dec!(3), dec!(95));

    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.gateway.open_calls(), 0);
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
}

#[tokio::test(start_paused = true)]
async fn externally_closed_position_resets_to_flat() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    h.gateway.seed_position("BTC", dec!(0), dec!(0));

    h.manager.tick().await.unwrap();

    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    assert_eq!(h.gateway.close_calls(), 0);
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        ManagerEvent::PositionClosed { reason, .. } if reason == "position no longer on venue"
    )));
    assert_eq!(h.alerts.all()[0].severity, AlertSeverity::Warning);
}

#[tokio::test(start_paused = true)]
async fn trailing_stop_activates_and_ratchets() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    // +2.5% of balance, past the 2% activation.
    h.gateway.set_mark("BTC", dec!(101));
    h.manager.tick().await.unwrap();
    // +3.0%: stop follows the new high.
    h.gateway.set_mark("BTC", dec!(101.2));
    h.manager.tick().await.unwrap();

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ManagerEvent::TrailingActivated { .. })));
    let risk = h.manager.status().risk.unwrap();
    assert!(risk.trailing_active);
    assert_eq!(risk.highest_progress_pct, dec!(3));
    // High 3.0% minus 0.6% trail = 2.4% of 1000 over 25 units above entry.
    assert_eq!(risk.trailing_stop_price, dec!(100.96));
}

#[tokio::test(start_paused = true)]
async fn monitor_loop_closes_on_confirmed_stop_loss() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    h.gateway.set_mark("BTC", dec!(98));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = h.manager.spawn_monitor(shutdown_rx);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    assert_eq!(h.gateway.close_calls(), 1);

    shutdown_tx.send(true).unwrap();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn take_profit_closes_after_confirmation_ticks() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    // +4.0% of balance, past the 3.6% target and above the trailing stop.
    h.gateway.set_mark("BTC", dec!(101.6));
    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert_eq!(h.manager.status().risk.unwrap().hits.take_profit, 1);

    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    assert_eq!(h.gateway.close_calls(), 1);

    let status = h.manager.status();
    assert!(status.last_close_reason.unwrap().starts_with("take-profit"));
    assert_eq!(status.realized_pnl, dec!(40));
    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        ManagerEvent::PositionClosed { direction: Direction::Long, realized_pnl: Some(pnl), .. }
            if *pnl == dec!(40)
    )));
}

#[tokio::test(start_paused = true)]
async fn trailing_stop_breach_closes_after_confirmation_ticks() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    // +3.0% activates the trail at 2.4%, price 100.96.
    h.gateway.set_mark("BTC", dec!(101.2));
    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.status().risk.unwrap().trailing_stop_price, dec!(100.96));

    // Pull back under the stop while still in profit.
    h.gateway.set_mark("BTC", dec!(100.9));
    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert_eq!(h.manager.status().risk.unwrap().hits.trailing_stop, 1);

    h.manager.tick().await.unwrap();
    assert_eq!(h.manager.phase(), PhaseKind::Flat);
    assert_eq!(h.gateway.close_calls(), 1);

    let status = h.manager.status();
    assert!(status.last_close_reason.unwrap().starts_with("trailing-stop"));
    assert_eq!(status.realized_pnl, dec!(22.5));
}

#[tokio::test(start_paused = true)]
async fn lost_open_ack_is_not_resubmitted() {
    let h = Harness::new();
    h.venue.lose_open_acks(1);

    h.manager.process_signal(&long()).await.unwrap();

    assert_eq!(h.gateway.open_calls(), 1);
    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    let position = h.gateway.get_position("BTC").await.unwrap().unwrap();
    assert_eq!(position.direction, Direction::Long);
    assert_eq!(position.size, dec!(25));
    assert_eq!(h.manager.status().entry_balance, Some(dec!(1000)));
}

#[tokio::test(start_paused = true)]
async fn tick_read_taken_before_a_reversal_is_discarded() {
    let mut h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();

    let release = h.venue.stall_next_query();
    let manager = h.manager.clone();
    let tick = tokio::spawn(async move { manager.tick().await });
    h.venue.query_stalled().await;

    // Forced close and reversal finish while the tick still holds its long read.
    h.sentiment.set_index(10);
    h.manager.process_signal(&short()).await.unwrap();
    assert_eq!(h.manager.status().direction, Some(Direction::Short));

    release.notify_one();
    tick.await.unwrap().unwrap();

    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert_eq!(h.manager.status().direction, Some(Direction::Short));
    assert_eq!(h.gateway.open_calls(), 2);
    assert_eq!(h.gateway.close_calls(), 1);
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, ManagerEvent::Reconciled { .. })));
}

#[tokio::test(start_paused = true)]
async fn stale_flat_read_does_not_finish_a_new_position() {
    let h = Harness::new();
    h.manager.process_signal(&long()).await.unwrap();
    // Closed on the venue behind the manager's back.
    h.gateway.seed_position("BTC", dec!(0), dec!(0));

    let release = h.venue.stall_next_query();
    let manager = h.manager.clone();
    let tick = tokio::spawn(async move { manager.tick().await });
    h.venue.query_stalled().await;

    // The forced close finds the venue flat and the reversal opens a short.
    h.sentiment.set_index(10);
    h.manager.process_signal(&short()).await.unwrap();
    assert_eq!(h.manager.status().direction, Some(Direction::Short));

    release.notify_one();
    tick.await.unwrap().unwrap();

    assert_eq!(h.manager.phase(), PhaseKind::Monitoring);
    assert_eq!(h.manager.status().direction, Some(Direction::Short));
    assert!(h.gateway.get_position("BTC").await.unwrap().is_some());
    assert!(h.alerts.all().is_empty());
}
