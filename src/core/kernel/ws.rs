use crate::core::errors::ExchangeError;
use crate::core::kernel::backoff::BackoffPolicy;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket session configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Upper bound on the TCP + TLS + upgrade handshake
    pub connect_timeout: Duration,
    /// Quiet period after which a heartbeat is sent; a second quiet
    /// period in a row drops the connection
    pub keepalive_timeout: Duration,
    /// How long to wait for the venue to answer a login frame
    pub login_timeout: Duration,
    /// Capacity of the inbound frame channel
    pub frame_buffer: usize,
    /// Delay schedule between reconnect attempts
    pub backoff: BackoffPolicy,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(5),
            frame_buffer: 1024,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WsConfig {
    pub fn with_keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn with_frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// WebSocket session trait - pure transport layer
///
/// Reconnects, subscriptions and heartbeats live one level up in the
/// socket session; a transport only moves frames.
#[async_trait]
pub trait WsSession: Send + Sync + 'static {
    /// Open a fresh connection, dropping any previous one
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Receive the next raw message; `None` once the peer has gone away
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), ExchangeError>;

    /// Check if the connection is alive
    fn is_connected(&self) -> bool;
}

/// Tungstenite-based WebSocket transport
pub struct TungsteniteWs {
    url: String,
    exchange_name: String,
    connect_timeout: Duration,
    write: Option<SplitSink<Stream, Message>>,
    read: Option<SplitStream<Stream>>,
    connected: bool,
}

impl TungsteniteWs {
    /// Create a new transport
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    pub fn new(url: String, exchange_name: String) -> Self {
        Self {
            url,
            exchange_name,
            connect_timeout: WsConfig::default().connect_timeout,
            write: None,
            read: None,
            connected: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn drop_stream(&mut self) {
        self.connected = false;
        self.write = None;
        self.read = None;
    }
}

impl std::fmt::Debug for TungsteniteWs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteWs")
            .field("url", &self.url)
            .field("exchange_name", &self.exchange_name)
            .field("connected", &self.connected)
            .finish()
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.drop_stream();

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        debug!("WebSocket connected");

        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::NotConnected(
                "WebSocket not connected".to_string(),
            ));
        }

        let write = self.write.as_mut().ok_or_else(|| {
            ExchangeError::NotConnected("WebSocket write stream not available".to_string())
        })?;

        if let Err(e) = write.send(msg).await {
            self.connected = false;
            return Err(ExchangeError::NetworkError(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }

        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            if !self.connected {
                return None;
            }

            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(Message::Ping(data))) => {
                    // Answered here so callers never see transport pings
                    if let Err(e) = self.send_raw(Message::Pong(data)).await {
                        warn!(exchange = %self.exchange_name, "Failed to send pong response: {}", e);
                    }
                }
                Some(Ok(message)) => {
                    if matches!(message, Message::Close(_)) {
                        self.connected = false;
                    }
                    return Some(Ok(message));
                }
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(ExchangeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected = false;
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.drop_stream();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
