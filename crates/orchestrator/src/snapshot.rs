//! Observability snapshot of open positions.
//!
//! A JSON file mapping position ids (`"{symbol}-{opened_at_ms}"`) to the
//! entry data and latest risk state of each open position, for dashboards.
//! The engine only writes it: on restart the in-memory state is rebuilt from
//! the venue, never from this file.

use crate::events::PhaseKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use perp_guard_core::Direction;
use perp_guard_risk::{ProtectionLevels, RiskSnapshot};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from snapshot operations.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// IO error reading/writing file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    pub entry_price: Decimal,
    pub size: Decimal,
    pub entry_balance: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotState {
    pub phase: PhaseKind,
    pub progress_pct: Decimal,
    pub highest_progress_pct: Decimal,
    pub lowest_progress_pct: Decimal,
    pub trailing_stop_price: Decimal,
    pub trailing_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    pub symbol: String,
    pub direction: Direction,
    pub opened_at: DateTime<Utc>,
    pub initial_data: InitialData,
    pub state: SnapshotState,
}

impl PositionSnapshot {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        direction: Direction,
        opened_at: DateTime<Utc>,
        entry_price: Decimal,
        size: Decimal,
        entry_balance: Decimal,
        levels: ProtectionLevels,
        phase: PhaseKind,
        risk: &RiskSnapshot,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            direction,
            opened_at,
            initial_data: InitialData {
                entry_price,
                size,
                entry_balance,
                take_profit_price: levels.take_profit_price,
                stop_loss_price: levels.stop_loss_price,
            },
            state: SnapshotState {
                phase,
                progress_pct: risk.progress_pct,
                highest_progress_pct: risk.highest_progress_pct,
                lowest_progress_pct: risk.lowest_progress_pct,
                trailing_stop_price: risk.trailing_stop_price,
                trailing_active: risk.trailing_active,
            },
        }
    }
}

/// Position id used as the snapshot key.
#[must_use]
pub fn position_id(symbol: &str, opened_at: DateTime<Utc>) -> String {
    format!("{symbol}-{}", opened_at.timestamp_millis())
}

/// Writes the snapshot file. Safe to share between managers.
#[derive(Debug)]
pub struct SnapshotStore {
    /// Path to the snapshot file.
    path: PathBuf,
    entries: Mutex<BTreeMap<String, PositionSnapshot>>,
}

impl SnapshotStore {
    /// Opens the store, seeding it from an existing file when it parses.
    ///
    /// A missing or corrupt file starts an empty store.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::read(&path) {
            Ok(Some(entries)) => {
                info!(path = %path.display(), count = entries.len(), "Loaded position snapshot");
                entries
            }
            Ok(None) => {
                info!(path = %path.display(), "No snapshot file found, starting fresh");
                BTreeMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load snapshot, starting fresh");
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts or replaces `id` and rewrites the file.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn upsert(&self, id: &str, snapshot: PositionSnapshot) -> Result<(), SnapshotError> {
        let mut entries = self.entries.lock();
        entries.insert(id.to_string(), snapshot);
        self.write(&entries)
    }

    /// Removes `id` and rewrites the file. Unknown ids are a no-op.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn remove(&self, id: &str) -> Result<(), SnapshotError> {
        let mut entries = self.entries.lock();
        if entries.remove(id).is_none() {
            return Ok(());
        }
        self.write(&entries)
    }

    /// Drops entries for `symbol` other than `keep`.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn retain_symbol(&self, symbol: &str, keep: Option<&str>) -> Result<(), SnapshotError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|id, snap| snap.symbol != symbol || Some(id.as_str()) == keep);
        if entries.len() == before {
            return Ok(());
        }
        self.write(&entries)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<PositionSnapshot> {
        self.entries.lock().get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn read(path: &Path) -> Result<Option<BTreeMap<String, PositionSnapshot>>, SnapshotError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn write(&self, entries: &BTreeMap<String, PositionSnapshot>) -> Result<(), SnapshotError> {
        // Create parent directories if needed
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, entries)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), count = entries.len(), "Saved position snapshot");
        Ok(())
    }
}
