//! Per-symbol risk parameters and their resolution from configuration.
//!
//! A [`Settings`] value is captured by a symbol manager when a position is
//! opened and is never re-read for the lifetime of that position.

use crate::config::SymbolConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Trailing-stop parameters, expressed in balance-impact percentage points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingSettings {
    /// Progress at which the trailing stop switches to high-water tracking.
    pub activation_pct: Decimal,
    /// Pullback from the running high that breaches the stop.
    pub trail_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub leverage_multiplier: u32,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub trailing: TrailingSettings,
    /// Consecutive ticks a condition must hold before acting.
    pub confirmation_hit_count: u32,
    pub monitor_interval_ms: u64,
    pub post_action_settle_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            leverage_multiplier: 10,
            take_profit_pct: dec!(3.6),
            stop_loss_pct: dec!(1.8),
            trailing: TrailingSettings {
                activation_pct: dec!(2.0),
                trail_pct: dec!(0.6),
            },
            confirmation_hit_count: 2,
            monitor_interval_ms: 1_000,
            post_action_settle_ms: 3_000,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("leverage multiplier must be at least 1")]
    ZeroLeverage,

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },

    #[error("confirmation hit count must be at least 1")]
    ZeroConfirmation,

    #[error("{0} must be non-zero")]
    ZeroInterval(&'static str),
}

impl Settings {
    /// Checks the invariants the risk loop relies on.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.leverage_multiplier == 0 {
            return Err(SettingsError::ZeroLeverage);
        }
        for (field, value) in [
            ("take_profit_pct", self.take_profit_pct),
            ("stop_loss_pct", self.stop_loss_pct),
            ("trailing.activation_pct", self.trailing.activation_pct),
            ("trailing.trail_pct", self.trailing.trail_pct),
        ] {
            if value <= Decimal::ZERO {
                return Err(SettingsError::NonPositive { field, value });
            }
        }
        if self.confirmation_hit_count == 0 {
            return Err(SettingsError::ZeroConfirmation);
        }
        if self.monitor_interval_ms == 0 {
            return Err(SettingsError::ZeroInterval("monitor_interval_ms"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.post_action_settle_ms)
    }

    /// Returns a copy with every `Some` field of `overrides` applied.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &SettingsOverrides) -> Self {
        if let Some(v) = overrides.leverage_multiplier {
            self.leverage_multiplier = v;
        }
        if let Some(v) = overrides.take_profit_pct {
            self.take_profit_pct = v;
        }
        if let Some(v) = overrides.stop_loss_pct {
            self.stop_loss_pct = v;
        }
        if let Some(v) = overrides.trailing_activation_pct {
            self.trailing.activation_pct = v;
        }
        if let Some(v) = overrides.trailing_trail_pct {
            self.trailing.trail_pct = v;
        }
        if let Some(v) = overrides.confirmation_hit_count {
            self.confirmation_hit_count = v;
        }
        if let Some(v) = overrides.monitor_interval_ms {
            self.monitor_interval_ms = v;
        }
        if let Some(v) = overrides.post_action_settle_ms {
            self.post_action_settle_ms = v;
        }
        self
    }
}

/// Sparse per-symbol overrides layered on top of the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsOverrides {
    #[serde(default)]
    pub leverage_multiplier: Option<u32>,
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub trailing_activation_pct: Option<Decimal>,
    #[serde(default)]
    pub trailing_trail_pct: Option<Decimal>,
    #[serde(default)]
    pub confirmation_hit_count: Option<u32>,
    #[serde(default)]
    pub monitor_interval_ms: Option<u64>,
    #[serde(default)]
    pub post_action_settle_ms: Option<u64>,
}

/// Pure lookup from symbol to its effective settings.
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    resolved: HashMap<String, Settings>,
}

impl SettingsResolver {
    /// Resolves and validates settings for every configured symbol.
    ///
    /// # Errors
    /// Returns an error naming the symbol whose effective settings are invalid.
    pub fn new(defaults: &Settings, symbols: &[SymbolConfig]) -> Result<Self, ResolveError> {
        let mut resolved = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let settings = defaults.with_overrides(&symbol.overrides);
            settings.validate().map_err(|source| ResolveError {
                symbol: symbol.symbol.clone(),
                source,
            })?;
            resolved.insert(symbol.symbol.clone(), settings);
        }
        Ok(Self { resolved })
    }

    #[must_use]
    pub fn resolve(&self, symbol: &str) -> Option<Settings> {
        self.resolved.get(symbol).copied()
    }

    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.resolved.contains_key(symbol)
    }

    /// Configured symbols in sorted order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.resolved.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid settings for {symbol}: {source}")]
pub struct ResolveError {
    pub symbol: String,
    #[source]
    pub source: SettingsError,
}
