//! CLI commands for the perp-guard engine.

pub mod position;
pub mod run;

pub use position::{close, open, status, ActionArgs, StatusArgs};
pub use run::run;
