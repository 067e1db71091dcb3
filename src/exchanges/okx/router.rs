use crate::core::errors::ExchangeError;
use crate::exchanges::okx::codec::{OkxCodec, OkxEvent, OkxMessage, OkxPush};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Decode and handle the data pushes of one or more channels.
///
/// `action` (`snapshot` / `update`) reaches the handler as is; merging
/// is the handler's job.
pub trait ChannelHandler: Send {
    fn handle(&mut self, push: &OkxPush) -> Result<(), ExchangeError>;
}

impl<F> ChannelHandler for F
where
    F: FnMut(&OkxPush) -> Result<(), ExchangeError> + Send,
{
    fn handle(&mut self, push: &OkxPush) -> Result<(), ExchangeError> {
        self(push)
    }
}

/// Where a frame went
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Control event; logged, never handed to a data handler
    Control(OkxEvent),
    /// Handled by the handler registered for this channel
    Delivered(String),
    /// Data for a channel nobody registered; dropped
    Unrouted(String),
    /// Heartbeat reply or non-text frame
    Ignored,
}

/// Demultiplexes inbound frames by channel tag.
#[derive(Default)]
pub struct MessageRouter {
    handlers: Vec<Box<dyn ChannelHandler>>,
    routes: HashMap<String, usize>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.routes.keys().collect();
        channels.sort();
        f.debug_struct("MessageRouter")
            .field("channels", &channels)
            .finish()
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every listed channel to `handler`. A channel registered
    /// again moves to the newer handler.
    pub fn register(mut self, channels: &[&str], handler: impl ChannelHandler + 'static) -> Self {
        let index = self.handlers.len();
        self.handlers.push(Box::new(handler));
        for channel in channels {
            self.routes.insert((*channel).to_string(), index);
        }
        self
    }

    pub fn handles(&self, channel: &str) -> bool {
        self.routes.contains_key(channel)
    }

    /// Route one raw text frame
    pub fn handle(&mut self, raw: &str) -> Result<Route, ExchangeError> {
        match OkxCodec::parse_text(raw)? {
            OkxMessage::Pong => Ok(Route::Ignored),
            OkxMessage::Event(event) => {
                Self::log_event(&event, raw);
                Ok(Route::Control(event))
            }
            OkxMessage::Data(push) => self.dispatch(&push),
        }
    }

    /// Route one WebSocket frame as produced by the socket session
    pub fn handle_message(&mut self, message: Message) -> Result<Route, ExchangeError> {
        match OkxCodec::frame_text(message)? {
            Some(text) => self.handle(&text),
            None => Ok(Route::Ignored),
        }
    }

    fn dispatch(&mut self, push: &OkxPush) -> Result<Route, ExchangeError> {
        let Some(&index) = self.routes.get(&push.channel) else {
            debug!(channel = %push.channel, "No handler for channel");
            return Ok(Route::Unrouted(push.channel.clone()));
        };

        self.handlers[index].handle(push)?;
        Ok(Route::Delivered(push.channel.clone()))
    }

    fn log_event(event: &OkxEvent, raw: &str) {
        match event.event.as_str() {
            "error" => error!(
                code = event.code.as_deref().unwrap_or(""),
                msg = event.msg.as_deref().unwrap_or(""),
                "Stream error event"
            ),
            "subscribe" => info!("Subscribed: {}", raw),
            "unsubscribe" => info!("Unsubscribed: {}", raw),
            other => debug!(event = other, "Stream event: {}", raw),
        }
    }

    /// Drain a frame channel until the sender side closes.
    ///
    /// Frames that fail to decode are logged and skipped.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Message>) {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = self.handle_message(frame) {
                warn!(error = %e, "Dropping frame");
            }
        }
        debug!("Frame channel closed, router stopping");
    }
}
