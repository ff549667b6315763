//! Position lifecycle engine.
//!
//! One [`SymbolManager`] per tradable symbol drives the
//! `Flat -> Opening -> Monitoring -> Closing` state machine on top of an
//! [`ExecutionGateway`](perp_guard_core::ExecutionGateway). The
//! [`TradingOrchestrator`] owns the managers, reconciles venue state at
//! startup and drains the signal queue into them one signal at a time.

pub mod actions;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod retry;
pub mod snapshot;

pub use actions::{close_and_verify, open_and_verify, ActionError, ActionKind};
pub use events::{ManagerEvent, ManagerStatus, PhaseKind};
pub use manager::{CloseOutcome, ManagerDeps, SymbolManager};
pub use orchestrator::{OrchestratorStatus, TradingOrchestrator};
pub use retry::RetryPolicy;
pub use snapshot::{PositionSnapshot, SnapshotError, SnapshotStore};
