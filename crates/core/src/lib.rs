pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod position;
pub mod sentiment;
pub mod settings;
pub mod traits;

pub use config::{
    AppConfig, GatewayConfig, OrchestratorConfig, RetryConfig, SentimentConfig, StreamConfig,
    SymbolConfig,
};
pub use config_loader::ConfigLoader;
pub use error::GatewayError;
pub use events::{Direction, Signal, SignalDirection};
pub use position::{AccountState, Position};
pub use sentiment::{MarketSentiment, SentimentCategory};
pub use settings::{Settings, SettingsOverrides, SettingsResolver, TrailingSettings};
pub use traits::{Alert, AlertSeverity, AlertSink, ExecutionGateway, SentimentProvider, TracingAlertSink};
