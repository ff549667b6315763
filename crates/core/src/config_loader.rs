use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";
const ENV_PREFIX: &str = "PERP_GUARD_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging defaults, TOML, environment variables, and JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from an explicit TOML file.
    ///
    /// Nested keys can be overridden from the environment with `__` separators,
    /// e.g. `PERP_GUARD_STREAM__URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig> {
        let path = path.as_ref();
        let config: AppConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            symbols = config.symbols.len(),
            paper = config.gateway.paper,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(path.with_extension("json")))
    }
}
