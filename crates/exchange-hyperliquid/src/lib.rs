pub mod client;
pub mod execution;
pub mod paper_execution;
pub mod signing;
pub mod wallet;

pub use client::HyperliquidClient;
pub use execution::HyperliquidGateway;
pub use paper_execution::{PaperGateway, PaperOp};
