pub mod levels;
pub mod progress;
pub mod tracker;

pub use levels::ProtectionLevels;
pub use progress::{infer_entry_balance, price_at_progress, progress_pct, PositionEntry};
pub use tracker::{
    CloseCondition, CloseTrigger, HitCounters, RiskSnapshot, RiskTracker, TickOutcome, TrailingUpdate,
};
