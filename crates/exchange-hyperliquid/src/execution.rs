use async_trait::async_trait;
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use parking_lot::RwLock;
use perp_guard_core::{
    AccountState, Direction, ExecutionGateway, GatewayConfig, GatewayError, Position,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::client::HyperliquidClient;
use crate::signing::{sign_action, signature_to_json};
use crate::wallet::load_wallet;

/// Significant figures accepted in an order price.
const PRICE_SIG_FIGS: u32 = 5;
/// Perp prices carry at most `6 - szDecimals` decimals.
const MAX_PRICE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AssetMeta {
    index: u32,
    sz_decimals: u32,
}

#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<UniverseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniverseEntry {
    name: String,
    sz_decimals: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    #[serde(default)]
    asset_positions: Vec<AssetPosition>,
    margin_summary: MarginSummary,
    #[serde(default)]
    withdrawable: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: VenuePosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VenuePosition {
    coin: String,
    szi: Decimal,
    #[serde(default)]
    entry_px: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    account_value: Decimal,
}

/// Live Hyperliquid perpetuals gateway.
///
/// Positions are sized at `margin_fraction` of account value times the
/// requested leverage and submitted as marketable IOC limit orders bounded by
/// `slippage_bps` around the mid price.
pub struct HyperliquidGateway {
    client: HyperliquidClient,
    wallet: LocalWallet,
    account: String,
    slippage_bps: Decimal,
    margin_fraction: Decimal,
    assets: RwLock<HashMap<String, AssetMeta>>,
    last_nonce: AtomicU64,
}

impl HyperliquidGateway {
    /// Builds the gateway from configuration, loading the API wallet from
    /// `credential_path`.
    ///
    /// # Errors
    /// Returns `Auth` when no credential file is configured or it is invalid
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let path = config
            .credential_path
            .as_deref()
            .ok_or_else(|| GatewayError::Auth("gateway.credential_path is not set".to_string()))?;
        let wallet = load_wallet(path)?;
        let client = HyperliquidClient::new(config.api_url.clone())?;
        Ok(Self::new(client, wallet, config))
    }

    /// The managed account defaults to the wallet's own address.
    #[must_use]
    pub fn new(client: HyperliquidClient, wallet: LocalWallet, config: &GatewayConfig) -> Self {
        let account = config
            .account_address
            .clone()
            .unwrap_or_else(|| format!("{:?}", wallet.address()));
        info!(account = %account, url = %client.base_url(), "Hyperliquid gateway ready");
        Self {
            client,
            wallet,
            account,
            slippage_bps: config.slippage_bps,
            margin_fraction: config.margin_fraction,
            assets: RwLock::new(HashMap::new()),
            last_nonce: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    async fn asset(&self, symbol: &str) -> Result<AssetMeta, GatewayError> {
        if let Some(meta) = self.assets.read().get(symbol) {
            return Ok(*meta);
        }

        let meta: Meta = decode(self.client.info(json!({"type": "meta"})).await?)?;
        let mut assets = self.assets.write();
        assets.clear();
        for (index, entry) in meta.universe.into_iter().enumerate() {
            let index = u32::try_from(index).map_err(|e| GatewayError::Parse(e.to_string()))?;
            assets.insert(
                entry.name,
                AssetMeta {
                    index,
                    sz_decimals: entry.sz_decimals,
                },
            );
        }
        assets
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    async fn clearinghouse(&self) -> Result<ClearinghouseState, GatewayError> {
        decode(
            self.client
                .info(json!({"type": "clearinghouseState", "user": self.account}))
                .await?,
        )
    }

    async fn mid(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let mids: HashMap<String, Decimal> =
            decode(self.client.info(json!({"type": "allMids"})).await?)?;
        mids.get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    /// Millisecond timestamp, strictly increasing across calls.
    fn next_nonce(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let mut last = self.last_nonce.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    async fn submit(&self, action: serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        let nonce = self.next_nonce();
        let signature = sign_action(&self.wallet, &action, nonce).await?;
        self.client
            .exchange(json!({
                "action": action,
                "nonce": nonce,
                "signature": signature_to_json(&signature),
                "vaultAddress": null,
            }))
            .await
    }

    async fn place_order(
        &self,
        symbol: &str,
        asset: AssetMeta,
        is_buy: bool,
        size: Decimal,
        mid: Decimal,
        reduce_only: bool,
    ) -> Result<String, GatewayError> {
        let slippage = self.slippage_bps / Decimal::from(10_000);
        let limit = if is_buy {
            mid * (Decimal::ONE + slippage)
        } else {
            mid * (Decimal::ONE - slippage)
        };
        let price = round_price(limit, asset.sz_decimals);

        let action = json!({
            "type": "order",
            "orders": [{
                "a": asset.index,
                "b": is_buy,
                "p": price.normalize().to_string(),
                "s": size.normalize().to_string(),
                "r": reduce_only,
                "t": {"limit": {"tif": "Ioc"}},
            }],
            "grouping": "na",
        });
        debug!(symbol = %symbol, is_buy, size = %size, price = %price, reduce_only, "Submitting order");

        let response = self.submit(action).await?;
        parse_order_response(symbol, &response)
    }
}

#[async_trait]
impl ExecutionGateway for HyperliquidGateway {
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        let state = self.clearinghouse().await?;
        let Some(venue) = state
            .asset_positions
            .into_iter()
            .map(|p| p.position)
            .find(|p| p.coin == symbol)
        else {
            return Ok(None);
        };
        if venue.szi.is_zero() {
            return Ok(None);
        }
        let mark = self.mid(symbol).await?;
        let entry = venue.entry_px.unwrap_or(mark);
        Ok(Position::from_signed(symbol, venue.szi, entry, mark))
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.mid(symbol).await
    }

    async fn account_state(&self) -> Result<AccountState, GatewayError> {
        let state = self.clearinghouse().await?;
        Ok(AccountState {
            balance: state.margin_summary.account_value,
        })
    }

    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        leverage: u32,
    ) -> Result<String, GatewayError> {
        let asset = self.asset(symbol).await?;
        let state = self.clearinghouse().await?;
        // A lost acknowledgement must not turn a retry into a second fill.
        if state
            .asset_positions
            .iter()
            .any(|p| p.position.coin == symbol && !p.position.szi.is_zero())
        {
            return Err(GatewayError::rejected(format!("{symbol} position already open")));
        }
        let mid = self.mid(symbol).await?;
        let balance = state.margin_summary.account_value;

        let size = order_size(balance, self.margin_fraction, leverage, mid, asset.sz_decimals);
        if size.is_zero() {
            return Err(GatewayError::ZeroSize {
                symbol: symbol.to_string(),
            });
        }
        let required = size * mid / Decimal::from(leverage.max(1));
        let available = state.withdrawable.unwrap_or(balance);
        if required > available {
            return Err(GatewayError::InsufficientMargin {
                required,
                available,
            });
        }

        let update = json!({
            "type": "updateLeverage",
            "asset": asset.index,
            "isCross": true,
            "leverage": leverage,
        });
        let response = self.submit(update).await?;
        ensure_ok(&response)?;

        let tx = self
            .place_order(symbol, asset, direction == Direction::Long, size, mid, false)
            .await?;
        info!(symbol = %symbol, direction = %direction, size = %size, leverage, tx = %tx, "Open order accepted");
        Ok(tx)
    }

    async fn close_position(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<String, GatewayError> {
        let Some(position) = self.get_position(symbol).await? else {
            return Err(GatewayError::rejected(format!("no open {symbol} position")));
        };
        if position.direction != direction {
            return Err(GatewayError::rejected(format!(
                "{symbol} position is {}, not {direction}",
                position.direction
            )));
        }
        let asset = self.asset(symbol).await?;

        let tx = self
            .place_order(
                symbol,
                asset,
                direction == Direction::Short,
                position.size,
                position.mark_price,
                true,
            )
            .await?;
        info!(symbol = %symbol, direction = %direction, size = %position.size, tx = %tx, "Close order accepted");
        Ok(tx)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|e| GatewayError::Parse(e.to_string()))
}

/// Base-unit size committing `margin_fraction` of `balance` at `leverage`,
/// rounded down to the venue's size precision.
fn order_size(
    balance: Decimal,
    margin_fraction: Decimal,
    leverage: u32,
    mid: Decimal,
    sz_decimals: u32,
) -> Decimal {
    if mid <= Decimal::ZERO || balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let notional = balance * margin_fraction * Decimal::from(leverage);
    (notional / mid).round_dp_with_strategy(sz_decimals, RoundingStrategy::ToZero)
}

fn round_price(price: Decimal, sz_decimals: u32) -> Decimal {
    let int_part = price.trunc().abs();
    let int_digits = if int_part.is_zero() {
        0
    } else {
        u32::try_from(int_part.to_string().len()).unwrap_or(PRICE_SIG_FIGS)
    };
    let sig_decimals = PRICE_SIG_FIGS.saturating_sub(int_digits);
    let max_decimals = MAX_PRICE_DECIMALS.saturating_sub(sz_decimals);
    price.round_dp(sig_decimals.min(max_decimals))
}

fn ensure_ok(response: &serde_json::Value) -> Result<(), GatewayError> {
    if response.get("status").and_then(|s| s.as_str()) == Some("ok") {
        return Ok(());
    }
    let message = response
        .get("response")
        .and_then(|r| r.as_str())
        .unwrap_or("unknown error");
    Err(classify_rejection(message))
}

fn parse_order_response(symbol: &str, response: &serde_json::Value) -> Result<String, GatewayError> {
    ensure_ok(response)?;

    let first_status = response
        .get("response")
        .and_then(|r| r.get("data"))
        .and_then(|d| d.get("statuses"))
        .and_then(|s| s.as_array())
        .and_then(|s| s.first())
        .ok_or_else(|| GatewayError::Parse("no order status in response".to_string()))?;

    if let Some(error) = first_status.get("error").and_then(|e| e.as_str()) {
        warn!(symbol = %symbol, error = %error, "Order rejected");
        return Err(classify_rejection(error));
    }

    first_status
        .get("filled")
        .or_else(|| first_status.get("resting"))
        .and_then(|s| s.get("oid"))
        .and_then(serde_json::Value::as_u64)
        .map(|oid| oid.to_string())
        .ok_or_else(|| GatewayError::Parse(format!("unrecognised order status {first_status}")))
}

fn classify_rejection(message: &str) -> GatewayError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("could not immediately match") || lower.contains("liquidity") {
        GatewayError::Liquidity(message.to_string())
    } else if lower.contains("rate limit") {
        GatewayError::RateLimited {
            retry_after_ms: 1_000,
        }
    } else {
        GatewayError::rejected(message)
    }
}
