use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{RestClient, RestResponse};
use crate::exchanges::okx::endpoints::{self, Endpoint, HttpMethod};
use crate::exchanges::okx::types::{Candle, OkxOrderBook, OkxResponse, OkxTicker, SystemTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Largest tolerated distance between local and server clocks
pub const MAX_CLOCK_SKEW_MS: u64 = 2000;

/// OKX REST API client implementation
///
/// Unwraps the `{code, msg, data}` envelope: only code `"0"` is success.
/// Nothing is retried here.
pub struct OkxRest<R: RestClient> {
    rest_client: R,
    clock: Arc<dyn Clock>,
}

impl<R: RestClient + std::fmt::Debug> std::fmt::Debug for OkxRest<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxRest")
            .field("rest_client", &self.rest_client)
            .finish_non_exhaustive()
    }
}

impl<R: RestClient> OkxRest<R> {
    pub fn new(rest_client: R) -> Self {
        Self {
            rest_client,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock compared against server time in [`Self::check_local_time`]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rest_client(&self) -> &R {
        &self.rest_client
    }

    /// Map a raw HTTP response onto the envelope
    fn handle_response(response: &RestResponse) -> Result<OkxResponse, ExchangeError> {
        match response.json::<OkxResponse>() {
            Ok(envelope) => envelope.into_result(),
            Err(e) if response.is_success() => Err(e),
            // Gateways answer errors with non-envelope bodies
            Err(_) => Err(ExchangeError::ApiError {
                code: response.status.to_string(),
                message: response.body.clone(),
            }),
        }
    }

    /// Send one request and unwrap the envelope.
    ///
    /// `body` is serialized once; those exact bytes are both signed and sent.
    /// Private requests (`public == false`) carry the four auth headers.
    #[instrument(skip(self, body, query), fields(exchange = "okx", method = method.as_str(), path = %path))]
    pub async fn request<B: Serialize + ?Sized + Sync>(
        &self,
        body: Option<&B>,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
        public: bool,
    ) -> Result<OkxResponse, ExchangeError> {
        let payload = match body {
            Some(body) => serde_json::to_vec(body).map_err(|e| {
                ExchangeError::SerializationError(format!("Failed to serialize request body: {}", e))
            })?,
            None => Vec::new(),
        };

        let response = self
            .rest_client
            .request(method.to_reqwest(), path, query, &payload, !public)
            .await?;

        let envelope = Self::handle_response(&response);
        if let Err(ExchangeError::ApiError { code, message }) = &envelope {
            warn!(status = response.status, %code, %message, "Request rejected");
        }
        envelope
    }

    /// Like [`Self::request`], decoding the payload into `T`.
    /// An empty payload yields `T::default()`.
    pub async fn request_into<T, B>(
        &self,
        body: Option<&B>,
        method: HttpMethod,
        path: &str,
        query: &[(&str, &str)],
        public: bool,
    ) -> Result<T, ExchangeError>
    where
        T: DeserializeOwned + Default,
        B: Serialize + ?Sized + Sync,
    {
        let envelope = self.request(body, method, path, query, public).await?;
        if envelope.data.is_empty() {
            return Ok(T::default());
        }
        envelope.decode()
    }

    /// Call a table endpoint.
    ///
    /// `params` is a JSON object; null and empty values are dropped. GET
    /// sends them as the query string, POST as the JSON body.
    pub async fn call(&self, endpoint: &Endpoint, params: &Value) -> Result<OkxResponse, ExchangeError> {
        let params = compact_params(params)?;
        debug!(endpoint = endpoint.name, params = params.len(), "Calling endpoint");

        match endpoint.method {
            HttpMethod::Get => {
                let pairs = query_pairs(&params);
                let query: Vec<(&str, &str)> = pairs
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                self.request::<Value>(None, endpoint.method, endpoint.path, &query, endpoint.public)
                    .await
            }
            HttpMethod::Post => {
                let body = Value::Object(params);
                self.request(Some(&body), endpoint.method, endpoint.path, &[], endpoint.public)
                    .await
            }
        }
    }

    /// [`Self::call`] with the payload decoded into `T`
    pub async fn call_into<T>(&self, endpoint: &Endpoint, params: &Value) -> Result<T, ExchangeError>
    where
        T: DeserializeOwned + Default,
    {
        let envelope = self.call(endpoint, params).await?;
        if envelope.data.is_empty() {
            return Ok(T::default());
        }
        envelope.decode()
    }

    /// Send an arbitrary JSON body, e.g. the array of a batch endpoint
    pub async fn call_with_body<B: Serialize + ?Sized + Sync>(
        &self,
        endpoint: &Endpoint,
        body: &B,
    ) -> Result<OkxResponse, ExchangeError> {
        self.request(Some(body), endpoint.method, endpoint.path, &[], endpoint.public)
            .await
    }

    /// Get system time from OKX
    pub async fn get_system_time(&self) -> Result<SystemTime, ExchangeError> {
        self.call(&endpoints::TIME, &Value::Null).await?.first()
    }

    /// Fail with `ClockSkew` when local time is more than
    /// [`MAX_CLOCK_SKEW_MS`] away from server time. Returns the skew.
    pub async fn check_local_time(&self) -> Result<u64, ExchangeError> {
        let server_ms = self.get_system_time().await?.millis()?;
        let local_ms = self.clock.now_ms();
        let skew_ms = local_ms.abs_diff(server_ms);

        if skew_ms > MAX_CLOCK_SKEW_MS {
            warn!(local_ms, server_ms, skew_ms, "Local clock out of sync");
            return Err(ExchangeError::ClockSkew {
                local_ms,
                server_ms,
                skew_ms,
            });
        }

        debug!(skew_ms, "Local clock in sync");
        Ok(skew_ms)
    }

    pub async fn get_ticker(&self, inst_id: &str) -> Result<OkxTicker, ExchangeError> {
        self.call(&endpoints::TICKER, &serde_json::json!({ "instId": inst_id }))
            .await?
            .first()
    }

    /// Order book depth; `size` is the number of levels per side
    pub async fn get_books(&self, inst_id: &str, size: Option<u32>) -> Result<OkxOrderBook, ExchangeError> {
        self.call(
            &endpoints::BOOKS,
            &serde_json::json!({ "instId": inst_id, "sz": size }),
        )
        .await?
        .first()
    }

    /// Recent candlesticks, newest first. `bar` defaults to `1m` on the
    /// venue side.
    pub async fn get_candles(
        &self,
        inst_id: &str,
        bar: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.candles(&endpoints::CANDLES, inst_id, bar, limit).await
    }

    /// Older candlesticks, beyond what [`Self::get_candles`] reaches
    pub async fn get_history_candles(
        &self,
        inst_id: &str,
        bar: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.candles(&endpoints::HISTORY_CANDLES, inst_id, bar, limit).await
    }

    async fn candles(
        &self,
        endpoint: &Endpoint,
        inst_id: &str,
        bar: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let rows: Vec<Vec<String>> = self
            .call_into(
                endpoint,
                &serde_json::json!({ "instId": inst_id, "bar": bar, "limit": limit }),
            )
            .await?;
        rows.iter().map(|row| Candle::parse(row)).collect()
    }
}

/// Drop null and empty-string members; anything but an object or null is rejected
fn compact_params(params: &Value) -> Result<Map<String, Value>, ExchangeError> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, value)| !is_empty_param(value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()),
        other => Err(ExchangeError::SerializationError(format!(
            "Endpoint parameters must be an object, got {}",
            other
        ))),
    }
}

fn is_empty_param(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Query-string form: strings raw, lists comma-joined, the rest as JSON
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    fn scalar(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    params
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::Array(items) => items.iter().map(scalar).collect::<Vec<_>>().join(","),
                other => scalar(other),
            };
            (key.clone(), rendered)
        })
        .collect()
}
