use crate::core::errors::ExchangeError;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// OKX API standard response wrapper: `{code, msg, data}`
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct OkxResponse {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl OkxResponse {
    /// `"0"` is the only success code
    pub fn is_success(&self) -> bool {
        self.code == "0"
    }

    /// Turn a rejected envelope into `ApiError`
    pub fn into_result(self) -> Result<Self, ExchangeError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ExchangeError::ApiError {
                code: self.code,
                message: self.msg,
            })
        }
    }

    /// Decode the payload records into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ExchangeError> {
        serde_json::from_value(Value::Array(self.data.clone())).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to decode response data: {}", e))
        })
    }

    /// Decode the first payload record
    pub fn first<T: DeserializeOwned>(&self) -> Result<T, ExchangeError> {
        let first = self.data.first().ok_or_else(|| {
            ExchangeError::DeserializationError("Response data is empty".to_string())
        })?;
        serde_json::from_value(first.clone()).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to decode response data: {}", e))
        })
    }
}

/// Server time
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SystemTime {
    pub ts: String, // Milliseconds since the epoch
}

impl SystemTime {
    pub fn millis(&self) -> Result<u64, ExchangeError> {
        self.ts
            .parse()
            .map_err(|e| ExchangeError::ParseError(format!("Invalid server time '{}': {}", self.ts, e)))
    }
}

/// OKX Ticker data
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OkxTicker {
    pub inst_type: String, // Instrument type
    pub inst_id: String,   // Instrument ID
    pub last: String,      // Last traded price
    #[serde(default)]
    pub last_sz: String, // Last traded size
    #[serde(default)]
    pub ask_px: String, // Best ask price
    #[serde(default)]
    pub ask_sz: String, // Best ask size
    #[serde(default)]
    pub bid_px: String, // Best bid price
    #[serde(default)]
    pub bid_sz: String, // Best bid size
    #[serde(default)]
    pub vol_ccy_24h: String, // 24h volume in quote currency
    pub ts: String,     // Timestamp
}

/// Order book depth as returned by REST and by the `books*` channels
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct OkxOrderBook {
    #[serde(default)]
    pub asks: Vec<Vec<String>>, // [price, size, liquidated_orders, order_count]
    #[serde(default)]
    pub bids: Vec<Vec<String>>, // [price, size, liquidated_orders, order_count]
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub checksum: Option<i64>,
    #[serde(default)]
    pub seq_id: Option<i64>,
    #[serde(default)]
    pub prev_seq_id: Option<i64>,
}

impl OkxOrderBook {
    pub fn ask_levels(&self) -> Result<Vec<BookLevel>, ExchangeError> {
        self.asks.iter().map(|row| BookLevel::parse(row)).collect()
    }

    pub fn bid_levels(&self) -> Result<Vec<BookLevel>, ExchangeError> {
        self.bids.iter().map(|row| BookLevel::parse(row)).collect()
    }
}

/// One parsed depth row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub orders: u64,
}

impl BookLevel {
    /// Parse `[price, size, liquidated_orders, order_count]`; the last two
    /// are optional.
    pub fn parse(row: &[String]) -> Result<Self, ExchangeError> {
        let (price, size) = match row {
            [price, size, ..] => (price, size),
            _ => {
                return Err(ExchangeError::ParseError(format!(
                    "Depth row needs price and size: {:?}",
                    row
                )))
            }
        };

        let orders = match row.get(3) {
            Some(count) => count.parse().map_err(|e| {
                ExchangeError::ParseError(format!("Invalid order count '{}': {}", count, e))
            })?,
            None => 0,
        };

        Ok(Self {
            price: parse_decimal(price)?,
            size: parse_decimal(size)?,
            orders,
        })
    }

    /// price * size
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// One candlestick from the `candles` / `history-candles` endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candle {
    pub ts: u64, // Bar open time, milliseconds
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>, // Base-currency volume, when the row carries it
    pub confirmed: bool,         // Bar is closed
}

impl Candle {
    /// Parse `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
    ///
    /// Rows need at least the first five fields. `confirm` is always the
    /// last field of a row with six or more; short six-field rows carry
    /// no volume.
    pub fn parse(row: &[String]) -> Result<Self, ExchangeError> {
        let [ts, open, high, low, close, rest @ ..] = row else {
            return Err(ExchangeError::ParseError(format!(
                "Candle row needs ts, open, high, low and close: {:?}",
                row
            )));
        };

        let volume = match rest {
            [volume, _, ..] => Some(parse_decimal(volume)?),
            _ => None,
        };

        Ok(Self {
            ts: ts
                .parse()
                .map_err(|e| ExchangeError::ParseError(format!("Invalid candle time '{}': {}", ts, e)))?,
            open: parse_decimal(open)?,
            high: parse_decimal(high)?,
            low: parse_decimal(low)?,
            close: parse_decimal(close)?,
            volume,
            confirmed: rest.last().is_some_and(|confirm| confirm == "1"),
        })
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .map_err(|e| ExchangeError::ParseError(format!("Invalid decimal '{}': {}", raw, e)))
}

/// OKX Trade data
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OkxTrade {
    pub inst_id: String,  // Instrument ID
    pub trade_id: String, // Trade ID
    pub px: String,       // Price
    pub sz: String,       // Size
    pub side: String,     // Side
    pub ts: String,       // Timestamp
    #[serde(default)]
    pub count: Option<String>, // Trade count (for aggregated trades)
}

/// OKX WebSocket request: `{op, args}`
#[derive(Debug, Serialize, Clone)]
pub struct OkxWsRequest<A> {
    pub op: String, // Operation: subscribe, unsubscribe, login
    pub args: Vec<A>,
}

/// Argument of the streaming login request
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OkxLoginArg {
    pub api_key: String,
    pub passphrase: String,
    pub timestamp: String, // Seconds since the epoch
    pub sign: String,
}

/// OKX WebSocket channel argument
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OkxWsChannel {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>, // instType, instFamily, uid, ...
}

/// Inbound frame envelope, control or data
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OkxWsFrame {
    #[serde(default)]
    pub event: Option<String>, // Control events: error, subscribe, unsubscribe, login
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub arg: Option<OkxWsChannel>,
    #[serde(default)]
    pub action: Option<String>, // snapshot | update
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub conn_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_tolerates_null_data() {
        let env: OkxResponse =
            serde_json::from_str(r#"{"code":"51000","msg":"Parameter error","data":null}"#)
                .unwrap();
        assert!(env.data.is_empty());
        match env.into_result() {
            Err(ExchangeError::ApiError { code, message }) => {
                assert_eq!(code, "51000");
                assert_eq!(message, "Parameter error");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_envelope_decode() {
        let env: OkxResponse =
            serde_json::from_str(r#"{"code":"0","msg":"","data":[{"ts":"1700000000000"}]}"#)
                .unwrap();
        let times: Vec<SystemTime> = env.decode().unwrap();
        assert_eq!(times[0].ts, "1700000000000");
        assert_eq!(env.first::<SystemTime>().unwrap().millis().unwrap(), 1_700_000_000_000);

        let wrong: Result<Vec<OkxTrade>, _> = env.decode();
        assert!(matches!(wrong, Err(ExchangeError::DeserializationError(_))));
    }

    #[test]
    fn test_book_level_parse() {
        let row: Vec<String> = ["41006.8", "0.60038921", "0", "1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let level = BookLevel::parse(&row).unwrap();
        assert_eq!(level.price, Decimal::from_str("41006.8").unwrap());
        assert_eq!(level.orders, 1);
        assert_eq!(
            level.notional(),
            Decimal::from_str("41006.8").unwrap() * Decimal::from_str("0.60038921").unwrap()
        );

        assert!(BookLevel::parse(&["1".to_string()]).is_err());
        assert!(BookLevel::parse(&["x".to_string(), "1".to_string()]).is_err());
        assert_eq!(
            BookLevel::parse(&["1".to_string(), "2".to_string()]).unwrap().orders,
            0
        );
    }

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candle_parse() {
        let full = Candle::parse(&row(&[
            "1597026383085", "3.721", "3.743", "3.677", "3.708", "8422410", "22698348.04828491",
            "12698348.04828491", "0",
        ]))
        .unwrap();
        assert_eq!(full.ts, 1_597_026_383_085);
        assert_eq!(full.high, Decimal::from_str("3.743").unwrap());
        assert_eq!(full.close, Decimal::from_str("3.708").unwrap());
        assert_eq!(full.volume, Some(Decimal::from_str("8422410").unwrap()));
        assert!(!full.confirmed);

        let short = Candle::parse(&row(&["1597026383085", "1", "2", "0.5", "1.5", "1"])).unwrap();
        assert_eq!(short.volume, None);
        assert!(short.confirmed);

        assert!(!Candle::parse(&row(&["1", "1", "1", "1", "1"])).unwrap().confirmed);
        assert!(Candle::parse(&row(&["1597026383085", "1", "2", "0.5"])).is_err());
        assert!(Candle::parse(&row(&["soon", "1", "2", "0.5", "1.5"])).is_err());
        assert!(Candle::parse(&row(&["1", "1", "2", "0.5", "x", "1"])).is_err());
    }

    #[test]
    fn test_channel_roundtrips_extra_fields() {
        let channel: OkxWsChannel =
            serde_json::from_str(r#"{"channel":"orders","instType":"SPOT","uid":"77"}"#).unwrap();
        assert_eq!(channel.inst_id, None);
        assert_eq!(channel.extra["instType"], "SPOT");
        let back = serde_json::to_value(&channel).unwrap();
        assert_eq!(back["uid"], "77");
        assert!(back.get("instId").is_none());
    }
}
