//! Wire format of the signal stream.
//!
//! ```json
//! // client -> server, once per subscribed (symbol, direction) pair
//! {"type": "subscribe", "symbol": "BTC", "direction": "long"}
//!
//! // server -> client, once after connect
//! {"type": "connection", "symbols": ["BTC", "ETH"]}
//!
//! // server -> client, signal events
//! {"symbol": "BTC", "direction": "long", "signal": 1}
//! ```

use perp_guard_core::{Direction, SignalDirection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub symbol: &'a str,
    pub direction: Direction,
}

impl<'a> SubscribeMessage<'a> {
    #[must_use]
    pub const fn new(symbol: &'a str, direction: Direction) -> Self {
        Self {
            msg_type: "subscribe",
            symbol,
            direction,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type", default)]
    msg_type: Option<String>,
    #[serde(default)]
    symbols: Vec<String>,
    #[serde(default)]
    symbol: Option<String>,
    /// Either a `long`/`short` label or a signed number.
    #[serde(default)]
    direction: Option<serde_json::Value>,
    #[serde(default)]
    signal: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Connection {
        symbols: Vec<String>,
    },
    Signal {
        symbol: String,
        /// Subscription stream the event arrived on.
        direction: Direction,
        signal: SignalDirection,
    },
}

impl InboundMessage {
    /// Parses one text frame.
    ///
    /// Frames that are valid JSON but not a recognisable connection or signal
    /// event (missing symbol, missing direction, out-of-range signal) yield `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error if the frame is not valid JSON.
    pub fn parse(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(text)?;

        if raw.msg_type.as_deref() == Some("connection") {
            return Ok(Some(Self::Connection {
                symbols: raw.symbols,
            }));
        }

        let (Some(symbol), Some(direction), Some(signal)) = (raw.symbol, raw.direction, raw.signal)
        else {
            return Ok(None);
        };
        let Some(direction) = parse_direction(&direction) else {
            return Ok(None);
        };
        let Ok(signal) = SignalDirection::try_from(signal) else {
            return Ok(None);
        };

        Ok(Some(Self::Signal {
            symbol,
            direction,
            signal,
        }))
    }
}

fn parse_direction(value: &serde_json::Value) -> Option<Direction> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(1) => Some(Direction::Long),
            Some(-1) => Some(Direction::Short),
            _ => None,
        },
        _ => None,
    }
}
