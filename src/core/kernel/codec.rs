use crate::core::errors::ExchangeError;
use crate::core::kernel::registry::SubscriptionDescriptor;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for handling exchange-specific WebSocket message encoding/decoding
///
/// The socket session uses the encoding half to (re)subscribe, log in and
/// keep the connection alive; the decoding half is used by whatever consumes
/// the inbound frames.
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing parsed messages from this exchange
    type Message: Send;

    /// Encode a subscription request for the given descriptors
    fn encode_subscription(
        &self,
        subscriptions: &[SubscriptionDescriptor],
    ) -> Result<Message, ExchangeError>;

    /// Encode an unsubscription request for the given descriptors
    fn encode_unsubscription(
        &self,
        subscriptions: &[SubscriptionDescriptor],
    ) -> Result<Message, ExchangeError>;

    /// Decode a raw WebSocket message into a typed message
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Message was ignored/filtered by codec
    /// - `Err(error)` - Failed to decode message
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError>;

    /// Login frame sent right after connecting, if this stream needs one
    fn encode_login(&self, _timestamp_ms: u64) -> Result<Option<Message>, ExchangeError> {
        Ok(None)
    }

    /// Inspect a frame received while waiting for the login answer.
    /// `None` means the frame is unrelated to login.
    fn login_result(&self, _message: &Message) -> Option<Result<(), ExchangeError>> {
        None
    }

    /// Frame sent when the connection has been quiet for a keep-alive window
    fn heartbeat(&self) -> Message {
        Message::Ping(Vec::new())
    }

    /// Whether a frame only answers a heartbeat and carries no data
    fn is_heartbeat_reply(&self, message: &Message) -> bool {
        matches!(message, Message::Pong(_))
    }
}
