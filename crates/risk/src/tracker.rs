//! Per-position risk tracker.
//!
//! Each monitoring tick feeds the current mark price into [`RiskTracker::on_tick`],
//! which updates the high/low water marks, ratchets the trailing stop and
//! debounces the three close conditions:
//!
//! - stop-loss: `progress <= -stop_loss_pct`
//! - take-profit: `progress >= take_profit_pct`
//! - trailing stop: mark price crosses the ratcheted stop price
//!
//! At most one condition is counted per tick (in that priority order). A tick
//! that counts one condition zeroes the other two counters; a tick where none
//! holds zeroes all three. A trigger is produced once the counted condition
//! reaches `confirmation_hit_count` consecutive ticks.

use crate::progress::PositionEntry;
use perp_guard_core::{Direction, Settings};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseCondition {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl CloseCondition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "stop-loss",
            Self::TakeProfit => "take-profit",
            Self::TrailingStop => "trailing-stop",
        }
    }
}

impl fmt::Display for CloseCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive-tick counters, one per close condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCounters {
    pub stop_loss: u32,
    pub take_profit: u32,
    pub trailing_stop: u32,
}

impl HitCounters {
    #[must_use]
    pub const fn get(&self, condition: CloseCondition) -> u32 {
        match condition {
            CloseCondition::StopLoss => self.stop_loss,
            CloseCondition::TakeProfit => self.take_profit,
            CloseCondition::TrailingStop => self.trailing_stop,
        }
    }

    /// Counts `condition` for this tick and zeroes every other counter.
    ///
    /// Returns the new count for `condition`, or 0 when nothing held.
    pub fn record(&mut self, condition: Option<CloseCondition>) -> u32 {
        let previous = condition.map_or(0, |c| self.get(c));
        *self = Self::default();
        let Some(condition) = condition else {
            return 0;
        };
        let count = previous.saturating_add(1);
        match condition {
            CloseCondition::StopLoss => self.stop_loss = count,
            CloseCondition::TakeProfit => self.take_profit = count,
            CloseCondition::TrailingStop => self.trailing_stop = count,
        }
        count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingUpdate {
    /// Progress crossed the activation threshold for the first time.
    Activated { stop_price: Decimal, progress_pct: Decimal },
    /// Stop moved in the holder's favour.
    Ratcheted { from: Decimal, to: Decimal },
}

/// A confirmed close condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseTrigger {
    pub condition: CloseCondition,
    pub progress_pct: Decimal,
    pub mark_price: Decimal,
    pub hits: u32,
}

impl CloseTrigger {
    /// Audit string recorded with the close.
    #[must_use]
    pub fn reason(&self) -> String {
        format!(
            "{} confirmed after {} ticks at {}% (mark {})",
            self.condition,
            self.hits,
            self.progress_pct.round_dp(4),
            self.mark_price
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub mark_price: Decimal,
    pub progress_pct: Decimal,
    /// Condition counted this tick and its consecutive count.
    pub pending: Option<(CloseCondition, u32)>,
    pub trailing: Option<TrailingUpdate>,
    pub trigger: Option<CloseTrigger>,
}

/// Serializable view of the tracker for status and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub progress_pct: Decimal,
    pub highest_progress_pct: Decimal,
    pub lowest_progress_pct: Decimal,
    pub trailing_stop_price: Decimal,
    pub trailing_active: bool,
    pub hits: HitCounters,
    pub ticks: u64,
}

#[derive(Debug, Clone)]
pub struct RiskTracker {
    entry: PositionEntry,
    settings: Settings,
    last_progress_pct: Decimal,
    highest_progress_pct: Decimal,
    lowest_progress_pct: Decimal,
    hits: HitCounters,
    trailing_stop_price: Decimal,
    trailing_active: bool,
    ticks: u64,
}

impl RiskTracker {
    /// Seeds a tracker for a newly observed position.
    ///
    /// The initial stop sits at the stop-loss distance from entry, in
    /// balance-impact terms.
    #[must_use]
    pub fn new(entry: PositionEntry, settings: Settings) -> Self {
        let trailing_stop_price = entry.price_at(-settings.stop_loss_pct);
        Self {
            entry,
            settings,
            last_progress_pct: Decimal::ZERO,
            highest_progress_pct: Decimal::ZERO,
            lowest_progress_pct: Decimal::ZERO,
            hits: HitCounters::default(),
            trailing_stop_price,
            trailing_active: false,
            ticks: 0,
        }
    }

    #[must_use]
    pub const fn entry(&self) -> &PositionEntry {
        &self.entry
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.entry.direction
    }

    #[must_use]
    pub const fn trailing_stop_price(&self) -> Decimal {
        self.trailing_stop_price
    }

    #[must_use]
    pub const fn trailing_active(&self) -> bool {
        self.trailing_active
    }

    #[must_use]
    pub const fn hits(&self) -> HitCounters {
        self.hits
    }

    #[must_use]
    pub const fn highest_progress_pct(&self) -> Decimal {
        self.highest_progress_pct
    }

    #[must_use]
    pub const fn lowest_progress_pct(&self) -> Decimal {
        self.lowest_progress_pct
    }

    #[must_use]
    pub fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            progress_pct: self.last_progress_pct,
            highest_progress_pct: self.highest_progress_pct,
            lowest_progress_pct: self.lowest_progress_pct,
            trailing_stop_price: self.trailing_stop_price,
            trailing_active: self.trailing_active,
            hits: self.hits,
            ticks: self.ticks,
        }
    }

    /// Evaluates one monitoring tick at `mark_price`.
    pub fn on_tick(&mut self, mark_price: Decimal) -> TickOutcome {
        let progress = self.entry.progress_at(mark_price);
        self.ticks += 1;
        self.last_progress_pct = progress;
        self.highest_progress_pct = self.highest_progress_pct.max(progress);
        self.lowest_progress_pct = self.lowest_progress_pct.min(progress);

        let trailing = self.update_trailing_stop(progress);
        let condition = self.condition_at(progress, mark_price);
        let count = self.hits.record(condition);

        let trigger = condition
            .filter(|_| count >= self.settings.confirmation_hit_count)
            .map(|condition| CloseTrigger {
                condition,
                progress_pct: progress,
                mark_price,
                hits: count,
            });

        TickOutcome {
            mark_price,
            progress_pct: progress,
            pending: condition.map(|c| (c, count)),
            trailing,
            trigger,
        }
    }

    fn condition_at(&self, progress: Decimal, mark_price: Decimal) -> Option<CloseCondition> {
        if progress <= -self.settings.stop_loss_pct {
            Some(CloseCondition::StopLoss)
        } else if progress >= self.settings.take_profit_pct {
            Some(CloseCondition::TakeProfit)
        } else if self.stop_breached(mark_price) {
            Some(CloseCondition::TrailingStop)
        } else {
            None
        }
    }

    fn stop_breached(&self, mark_price: Decimal) -> bool {
        match self.entry.direction {
            Direction::Long => mark_price <= self.trailing_stop_price,
            Direction::Short => mark_price >= self.trailing_stop_price,
        }
    }

    /// Target stop in progress terms:
    /// - before activation, slides linearly from `-stop_loss_pct` to breakeven
    ///   as the running high approaches the activation threshold;
    /// - once active, sits `trail_pct` below the running high.
    fn target_stop_progress(&self) -> Decimal {
        let trailing = &self.settings.trailing;
        if self.trailing_active {
            return self.highest_progress_pct - trailing.trail_pct;
        }
        let stop_loss = self.settings.stop_loss_pct;
        if self.highest_progress_pct <= Decimal::ZERO {
            return -stop_loss;
        }
        let ratio = (self.highest_progress_pct / trailing.activation_pct).min(Decimal::ONE);
        -stop_loss + stop_loss * ratio
    }

    fn update_trailing_stop(&mut self, progress: Decimal) -> Option<TrailingUpdate> {
        let activated = !self.trailing_active && progress >= self.settings.trailing.activation_pct;
        if activated {
            self.trailing_active = true;
        }

        let candidate = self.entry.price_at(self.target_stop_progress());
        let from = self.trailing_stop_price;
        let moved = self.is_favorable(candidate, from);
        if moved {
            self.trailing_stop_price = candidate;
        }

        if activated {
            Some(TrailingUpdate::Activated {
                stop_price: self.trailing_stop_price,
                progress_pct: progress,
            })
        } else if moved && self.trailing_active {
            Some(TrailingUpdate::Ratcheted {
                from,
                to: self.trailing_stop_price,
            })
        } else {
            None
        }
    }

    /// Raised for longs, lowered for shorts; never the other way.
    fn is_favorable(&self, candidate: Decimal, current: Decimal) -> bool {
        match self.entry.direction {
            Direction::Long => candidate > current,
            Direction::Short => candidate < current,
        }
    }
}
