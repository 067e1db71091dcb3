use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::registry::SubscriptionDescriptor;
use crate::exchanges::okx::signer::OkxSigner;
use crate::exchanges::okx::types::{OkxLoginArg, OkxWsChannel, OkxWsFrame, OkxWsRequest};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;

/// Control event: `{event, code?, msg?, arg?}`
#[derive(Debug, Clone, PartialEq)]
pub struct OkxEvent {
    pub event: String,
    pub code: Option<String>,
    pub msg: Option<String>,
    pub arg: Option<OkxWsChannel>,
}

/// Data push: `{arg: {channel, instId?}, action?, data}`
#[derive(Debug, Clone, PartialEq)]
pub struct OkxPush {
    pub channel: String,
    pub inst_id: Option<String>,
    pub action: Option<String>,
    pub data: Value,
}

/// OKX WebSocket message types
#[derive(Debug, Clone, PartialEq)]
pub enum OkxMessage {
    /// error, subscribe, unsubscribe, login, notice...
    Event(OkxEvent),
    /// Channel data
    Data(OkxPush),
    /// Reply to the text heartbeat
    Pong,
}

/// OKX WebSocket codec implementation
///
/// A codec built with a signer logs in on every connect.
#[derive(Debug, Clone, Default)]
pub struct OkxCodec {
    signer: Option<Arc<OkxSigner>>,
}

impl OkxCodec {
    /// Codec for streams that need no login
    pub fn public() -> Self {
        Self { signer: None }
    }

    /// Codec that logs in with the given credentials
    pub fn private(signer: Arc<OkxSigner>) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    pub fn requires_login(&self) -> bool {
        self.signer.is_some()
    }

    fn encode_request<A: Serialize>(op: &str, args: Vec<A>) -> Result<Message, ExchangeError> {
        let request = OkxWsRequest {
            op: op.to_string(),
            args,
        };

        serde_json::to_string(&request)
            .map(Message::Text)
            .map_err(|e| ExchangeError::SerializationError(e.to_string()))
    }

    fn channel_args(subscriptions: &[SubscriptionDescriptor]) -> Vec<Value> {
        subscriptions.iter().map(SubscriptionDescriptor::to_arg).collect()
    }

    /// Classify one text frame
    pub fn parse_text(text: &str) -> Result<OkxMessage, ExchangeError> {
        if text == "pong" {
            return Ok(OkxMessage::Pong);
        }

        let frame: OkxWsFrame = serde_json::from_str(text)
            .map_err(|e| ExchangeError::ParseError(format!("Failed to parse JSON: {}", e)))?;

        if let Some(event) = frame.event {
            return Ok(OkxMessage::Event(OkxEvent {
                event,
                code: frame.code,
                msg: frame.msg,
                arg: frame.arg,
            }));
        }

        match (frame.arg, frame.data) {
            (Some(arg), Some(data)) => Ok(OkxMessage::Data(OkxPush {
                channel: arg.channel,
                inst_id: arg.inst_id,
                action: frame.action,
                data,
            })),
            _ => Err(ExchangeError::ParseError(format!(
                "Unknown message format: {}",
                text
            ))),
        }
    }

    /// Text payload of a frame; `None` for control frames
    pub fn frame_text(message: Message) -> Result<Option<String>, ExchangeError> {
        match message {
            Message::Text(text) => Ok(Some(text)),
            Message::Binary(data) => String::from_utf8(data).map(Some).map_err(|e| {
                ExchangeError::ParseError(format!("Invalid UTF-8 in binary message: {}", e))
            }),
            _ => Ok(None),
        }
    }
}

impl WsCodec for OkxCodec {
    type Message = OkxMessage;

    fn encode_subscription(
        &self,
        subscriptions: &[SubscriptionDescriptor],
    ) -> Result<Message, ExchangeError> {
        Self::encode_request("subscribe", Self::channel_args(subscriptions))
    }

    fn encode_unsubscription(
        &self,
        subscriptions: &[SubscriptionDescriptor],
    ) -> Result<Message, ExchangeError> {
        Self::encode_request("unsubscribe", Self::channel_args(subscriptions))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError> {
        if let Message::Pong(_) = message {
            return Ok(Some(OkxMessage::Pong));
        }
        match Self::frame_text(message)? {
            Some(text) => Self::parse_text(&text).map(Some),
            None => Ok(None),
        }
    }

    fn encode_login(&self, timestamp_ms: u64) -> Result<Option<Message>, ExchangeError> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };

        let timestamp = timestamp_ms / 1000;
        let arg = OkxLoginArg {
            api_key: signer.api_key().to_string(),
            passphrase: signer.passphrase().to_string(),
            timestamp: timestamp.to_string(),
            sign: signer.sign_login(timestamp)?,
        };

        Self::encode_request("login", vec![arg]).map(Some)
    }

    fn login_result(&self, message: &Message) -> Option<Result<(), ExchangeError>> {
        let Message::Text(text) = message else {
            return None;
        };
        let Ok(OkxMessage::Event(event)) = Self::parse_text(text) else {
            return None;
        };

        let rejected = |event: &OkxEvent| -> Result<(), ExchangeError> {
            Err(ExchangeError::AuthError(format!(
                "Login rejected: {} - {}",
                event.code.as_deref().unwrap_or("unknown"),
                event.msg.as_deref().unwrap_or("")
            )))
        };

        match event.event.as_str() {
            "login" if event.code.as_deref().unwrap_or("0") == "0" => Some(Ok(())),
            "login" | "error" => Some(rejected(&event)),
            _ => None,
        }
    }

    fn heartbeat(&self) -> Message {
        Message::Text("ping".to_string())
    }

    fn is_heartbeat_reply(&self, message: &Message) -> bool {
        match message {
            Message::Text(text) => text == "pong",
            Message::Pong(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("Expected text message, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_subscribe() {
        let codec = OkxCodec::public();
        let subs = [
            SubscriptionDescriptor::new("tickers").instrument("instId", "BTC-USDT"),
            SubscriptionDescriptor::new("orders").with_arg("instType", "SPOT"),
        ];

        let frame = text(codec.encode_subscription(&subs).unwrap());
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["args"][0]["channel"], "tickers");
        assert_eq!(frame["args"][0]["instId"], "BTC-USDT");
        assert_eq!(frame["args"][1]["instType"], "SPOT");
        assert!(frame["args"][1].get("instId").is_none());

        let frame = text(codec.encode_unsubscription(&subs[..1]).unwrap());
        assert_eq!(frame["op"], "unsubscribe");
        assert_eq!(frame["args"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_decode_pong() {
        let codec = OkxCodec::public();
        let result = codec.decode_message(Message::Text("pong".to_string()));
        assert_eq!(result.unwrap(), Some(OkxMessage::Pong));
        assert!(codec.is_heartbeat_reply(&Message::Text("pong".to_string())));
        assert_eq!(codec.heartbeat(), Message::Text("ping".to_string()));
    }

    #[test]
    fn test_decode_error() {
        let codec = OkxCodec::public();
        let error_msg = r#"{"event":"error","code":"60012","msg":"Invalid request"}"#;
        let result = codec.decode_message(Message::Text(error_msg.to_string()));

        match result.unwrap() {
            Some(OkxMessage::Event(event)) => {
                assert_eq!(event.event, "error");
                assert_eq!(event.code.as_deref(), Some("60012"));
                assert_eq!(event.msg.as_deref(), Some("Invalid request"));
            }
            other => panic!("Expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_data() {
        let raw = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{"asks":[],"bids":[],"ts":"1"}]}"#;
        match OkxCodec::parse_text(raw).unwrap() {
            OkxMessage::Data(push) => {
                assert_eq!(push.channel, "books");
                assert_eq!(push.inst_id.as_deref(), Some("BTC-USDT"));
                assert_eq!(push.action.as_deref(), Some("snapshot"));
                assert!(push.data.is_array());
            }
            other => panic!("Expected data, got {:?}", other),
        }

        assert!(OkxCodec::parse_text(r#"{"id":"1"}"#).is_err());
        assert!(OkxCodec::parse_text("garbage").is_err());
    }

    #[test]
    fn test_login_frame() {
        let signer = Arc::new(OkxSigner::new(
            "key".to_string(),
            "secret".to_string(),
            "pass".to_string(),
        ));
        let codec = OkxCodec::private(signer);
        assert!(codec.requires_login());

        let frame = text(codec.encode_login(1_538_054_050_975).unwrap().unwrap());
        assert_eq!(frame["op"], "login");
        assert_eq!(frame["args"][0]["apiKey"], "key");
        assert_eq!(frame["args"][0]["passphrase"], "pass");
        assert_eq!(frame["args"][0]["timestamp"], "1538054050");
        assert_eq!(
            frame["args"][0]["sign"],
            "Gj2hQIVKFcXbiwCak8SmVOu5mxPCizWDdmUAhbx8Z+s="
        );

        assert!(OkxCodec::public().encode_login(1).unwrap().is_none());
    }

    #[test]
    fn test_login_result() {
        let codec = OkxCodec::public();
        let ok = Message::Text(r#"{"event":"login","code":"0","msg":"","connId":"a4d3ae55"}"#.to_string());
        assert!(matches!(codec.login_result(&ok), Some(Ok(()))));

        let failed = Message::Text(r#"{"event":"error","code":"60009","msg":"Login failed."}"#.to_string());
        assert!(matches!(
            codec.login_result(&failed),
            Some(Err(ExchangeError::AuthError(_)))
        ));

        let unrelated = Message::Text(r#"{"event":"subscribe","arg":{"channel":"tickers"}}"#.to_string());
        assert!(codec.login_result(&unrelated).is_none());
        assert!(codec.login_result(&Message::Text("pong".to_string())).is_none());
    }
}
