//! One-shot position actions through the same attempt, settle and verify path
//! the engine uses.

use crate::venue::Venue;
use anyhow::{Context, Result};
use clap::Args;
use perp_guard_core::{AppConfig, Direction, ExecutionGateway, Settings, SettingsResolver};
use perp_guard_orchestrator::{close_and_verify, open_and_verify, RetryPolicy};
use serde_json::json;

/// Arguments for `open` and `close`.
#[derive(Args, Debug)]
pub struct ActionArgs {
    /// Symbol to trade (e.g. BTC)
    pub symbol: String,

    /// long, short, 1 or -1
    #[arg(allow_negative_numbers = true)]
    pub direction: Direction,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    pub symbol: String,
}

/// Effective settings for `symbol`; unconfigured symbols use the defaults.
fn settings_for(config: &AppConfig, symbol: &str) -> Result<Settings> {
    let resolver = SettingsResolver::new(&config.defaults, &config.symbols)?;
    let settings = resolver.resolve(symbol).unwrap_or(config.defaults);
    settings
        .validate()
        .with_context(|| format!("invalid settings for {symbol}"))?;
    Ok(settings)
}

async fn venue_for(config: &AppConfig, symbol: &str) -> Result<Venue> {
    let venue = Venue::from_config(&config.gateway)?;
    if venue.is_paper() {
        tracing::warn!("Paper venue is in-memory; nothing persists past this command");
        venue.prime(&[symbol.to_string()]).await?;
    }
    Ok(venue)
}

pub async fn open(config: &AppConfig, args: ActionArgs) -> Result<()> {
    let settings = settings_for(config, &args.symbol)?;
    let venue = venue_for(config, &args.symbol).await?;
    let gateway = venue.gateway();

    let position = open_and_verify(
        gateway.as_ref(),
        &RetryPolicy::from_config(&config.retry),
        &args.symbol,
        args.direction,
        settings.leverage_multiplier,
        settings.settle_delay(),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&position)?);
    Ok(())
}

pub async fn close(config: &AppConfig, args: ActionArgs) -> Result<()> {
    let settings = settings_for(config, &args.symbol)?;
    let venue = venue_for(config, &args.symbol).await?;
    let gateway = venue.gateway();

    close_and_verify(
        gateway.as_ref(),
        &RetryPolicy::from_config(&config.retry),
        &args.symbol,
        args.direction,
        settings.settle_delay(),
    )
    .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "symbol": args.symbol,
            "direction": args.direction,
            "closed": true,
        }))?
    );
    Ok(())
}

pub async fn status(config: &AppConfig, args: StatusArgs) -> Result<()> {
    let venue = venue_for(config, &args.symbol).await?;
    let gateway = venue.gateway();

    let mark_price = gateway
        .get_mark_price(&args.symbol)
        .await
        .with_context(|| format!("failed to read {} mark price", args.symbol))?;
    let position = gateway
        .get_position(&args.symbol)
        .await
        .with_context(|| format!("failed to read {} position", args.symbol))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "symbol": args.symbol,
            "mark_price": mark_price,
            "position": position,
        }))?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use perp_guard_core::{SettingsOverrides, SymbolConfig};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        action: ActionArgs,
    }

    #[test]
    fn direction_accepts_words_and_signs() {
        let cli = TestCli::try_parse_from(["test", "BTC", "-1"]).unwrap();
        assert_eq!(cli.action.direction, Direction::Short);

        let cli = TestCli::try_parse_from(["test", "ETH", "LONG"]).unwrap();
        assert_eq!(cli.action.symbol, "ETH");
        assert_eq!(cli.action.direction, Direction::Long);

        assert!(TestCli::try_parse_from(["test", "BTC", "0"]).is_err());
    }

    #[test]
    fn settings_fall_back_to_defaults_for_unconfigured_symbols() {
        let config = AppConfig {
            symbols: vec![SymbolConfig {
                symbol: "BTC".to_string(),
                directions: vec![Direction::Long],
                overrides: SettingsOverrides {
                    leverage_multiplier: Some(3),
                    ..SettingsOverrides::default()
                },
            }],
            ..AppConfig::default()
        };

        assert_eq!(settings_for(&config, "BTC").unwrap().leverage_multiplier, 3);
        assert_eq!(
            settings_for(&config, "SOL").unwrap().leverage_multiplier,
            config.defaults.leverage_multiplier
        );
    }
}
