use crate::client::HyperliquidClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use perp_guard_core::{AccountState, Direction, ExecutionGateway, GatewayError, Position};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::{HashMap, VecDeque};
use tracing::info;

/// Size precision used by the paper venue.
const PAPER_SZ_DECIMALS: u32 = 6;

/// Gateway operation a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOp {
    Open,
    Close,
    Query,
}

#[derive(Debug, Clone, Copy)]
struct PaperPosition {
    direction: Direction,
    size: Decimal,
    entry_price: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    /// Realized balance; account value adds unrealized P&L on top.
    cash: Decimal,
    marks: HashMap<String, Decimal>,
    positions: HashMap<String, PaperPosition>,
    failures: VecDeque<(PaperOp, GatewayError)>,
    /// Accepted orders that are acknowledged but never filled.
    unfilled_orders: u32,
    next_tx: u64,
    open_calls: u32,
    close_calls: u32,
}

impl PaperState {
    fn take_failure(&mut self, op: PaperOp) -> Option<GatewayError> {
        let idx = self.failures.iter().position(|(o, _)| *o == op)?;
        self.failures.remove(idx).map(|(_, e)| e)
    }

    fn mark(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.marks
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    fn unrealized(&self) -> Decimal {
        self.positions
            .iter()
            .filter_map(|(symbol, p)| {
                let mark = self.marks.get(symbol)?;
                let diff = match p.direction {
                    Direction::Long => *mark - p.entry_price,
                    Direction::Short => p.entry_price - *mark,
                };
                Some(diff * p.size)
            })
            .sum()
    }

    fn tx(&mut self, prefix: &str) -> String {
        self.next_tx += 1;
        format!("paper-{prefix}-{}", self.next_tx)
    }
}

/// In-memory execution venue.
///
/// Fills instantly at the current mark price. Marks are set by the caller or
/// copied from the live venue with [`PaperGateway::sync_marks`]. Failures and
/// unfilled acknowledgements can be scripted so the retry and verification
/// paths run without a live exchange. It is impossible to execute real
/// trades through this gateway.
pub struct PaperGateway {
    state: Mutex<PaperState>,
    margin_fraction: Decimal,
}

impl PaperGateway {
    #[must_use]
    pub fn new(balance: Decimal, margin_fraction: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: balance,
                ..PaperState::default()
            }),
            margin_fraction,
        }
    }

    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.state.lock().marks.insert(symbol.to_string(), price);
    }

    /// Places a position directly, as if opened before this process started.
    pub fn seed_position(&self, symbol: &str, signed_size: Decimal, entry_price: Decimal) {
        let mut state = self.state.lock();
        match Direction::from_signed_size(signed_size) {
            Some(direction) => {
                state.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        direction,
                        size: signed_size.abs(),
                        entry_price,
                    },
                );
            }
            None => {
                state.positions.remove(symbol);
            }
        }
    }

    /// The next `op` call fails with `error`. Failures queue in order.
    pub fn inject_failure(&self, op: PaperOp, error: GatewayError) {
        self.state.lock().failures.push_back((op, error));
    }

    /// The next `count` open/close orders are acknowledged with a
    /// transaction id but leave the position unchanged.
    pub fn leave_unfilled(&self, count: u32) {
        self.state.lock().unfilled_orders = count;
    }

    /// Number of `open_position` calls received, including failed ones.
    #[must_use]
    pub fn open_calls(&self) -> u32 {
        self.state.lock().open_calls
    }

    #[must_use]
    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    #[must_use]
    pub fn balance(&self) -> Decimal {
        let state = self.state.lock();
        state.cash + state.unrealized()
    }

    /// Copies live mid prices for `symbols` from the `/info` endpoint.
    /// Returns how many marks were updated.
    ///
    /// # Errors
    /// Returns error if the request fails or the response is not a price map.
    pub async fn sync_marks(
        &self,
        client: &HyperliquidClient,
        symbols: &[String],
    ) -> Result<usize, GatewayError> {
        let raw = client.info(serde_json::json!({"type": "allMids"})).await?;
        let mids: HashMap<String, Decimal> =
            serde_json::from_value(raw).map_err(|e| GatewayError::Parse(e.to_string()))?;

        let mut state = self.state.lock();
        let mut updated = 0;
        for symbol in symbols {
            if let Some(mid) = mids.get(symbol) {
                state.marks.insert(symbol.clone(), *mid);
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn consume_unfilled(state: &mut PaperState) -> bool {
        if state.unfilled_orders > 0 {
            state.unfilled_orders -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, GatewayError> {
        let mut state = self.state.lock();
        if let Some(e) = state.take_failure(PaperOp::Query) {
            return Err(e);
        }
        let Some(p) = state.positions.get(symbol).copied() else {
            return Ok(None);
        };
        let mark = state.mark(symbol)?;
        Ok(Some(Position {
            symbol: symbol.to_string(),
            direction: p.direction,
            size: p.size,
            entry_price: p.entry_price,
            mark_price: mark,
        }))
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        let mut state = self.state.lock();
        if let Some(e) = state.take_failure(PaperOp::Query) {
            return Err(e);
        }
        state.mark(symbol)
    }

    async fn account_state(&self) -> Result<AccountState, GatewayError> {
        let mut state = self.state.lock();
        if let Some(e) = state.take_failure(PaperOp::Query) {
            return Err(e);
        }
        Ok(AccountState {
            balance: state.cash + state.unrealized(),
        })
    }

    async fn open_position(
        &self,
        symbol: &str,
        direction: Direction,
        leverage: u32,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if let Some(e) = state.take_failure(PaperOp::Open) {
            return Err(e);
        }
        if state.positions.contains_key(symbol) {
            return Err(GatewayError::rejected(format!("{symbol} position already open")));
        }

        let mark = state.mark(symbol)?;
        let balance = state.cash + state.unrealized();
        let size = if mark > Decimal::ZERO && balance > Decimal::ZERO {
            (balance * self.margin_fraction * Decimal::from(leverage) / mark)
                .round_dp_with_strategy(PAPER_SZ_DECIMALS, RoundingStrategy::ToZero)
        } else {
            Decimal::ZERO
        };
        if size.is_zero() {
            return Err(GatewayError::ZeroSize {
                symbol: symbol.to_string(),
            });
        }

        let tx = state.tx("open");
        if Self::consume_unfilled(&mut state) {
            info!(symbol = %symbol, tx = %tx, "Paper open acknowledged, left unfilled");
            return Ok(tx);
        }
        state.positions.insert(
            symbol.to_string(),
            PaperPosition {
                direction,
                size,
                entry_price: mark,
            },
        );
        info!(symbol = %symbol, direction = %direction, size = %size, price = %mark, "Paper position opened");
        Ok(tx)
    }

    async fn close_position(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if let Some(e) = state.take_failure(PaperOp::Close) {
            return Err(e);
        }
        let Some(position) = state.positions.get(symbol).copied() else {
            return Err(GatewayError::rejected(format!("no open {symbol} position")));
        };
        if position.direction != direction {
            return Err(GatewayError::rejected(format!(
                "{symbol} position is {}, not {direction}",
                position.direction
            )));
        }

        let tx = state.tx("close");
        if Self::consume_unfilled(&mut state) {
            info!(symbol = %symbol, tx = %tx, "Paper close acknowledged, left unfilled");
            return Ok(tx);
        }
        let mark = state.mark(symbol)?;
        let diff = match position.direction {
            Direction::Long => mark - position.entry_price,
            Direction::Short => position.entry_price - mark,
        };
        state.cash += diff * position.size;
        state.positions.remove(symbol);
        info!(symbol = %symbol, price = %mark, pnl = %(diff * position.size), "Paper position closed");
        Ok(tx)
    }
}
