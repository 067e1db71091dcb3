//! Kernel - venue-agnostic transport layer
//!
//! Everything here is independent of any particular venue: the venue layer
//! plugs in a [`Signer`] for REST authentication and a [`WsCodec`] for the
//! streaming wire format.
//!
//! # Architecture
//!
//! ## Transport Layer
//! - `RestClient`: HTTP client interface, `ReqwestRest` implementation
//! - `WsSession`: raw WebSocket transport, `TungsteniteWs` implementation
//!
//! ## Session Layer
//! - `SubscriptionRegistry`: desired subscriptions, independent of any connection
//! - `SocketSession`: one logical stream with reconnect, login and replay
//! - `BackoffPolicy`: delay schedule between reconnect attempts
//!
//! ## Pluggable Pieces
//! - `Signer`: request authentication
//! - `WsCodec`: venue message encoding/decoding
//!
//! # Usage
//!
//! ```rust,no_run
//! use okx_session::core::kernel::*;
//! use okx_session::exchanges::okx::codec::OkxCodec;
//!
//! # async fn example() -> Result<(), okx_session::core::errors::ExchangeError> {
//! let transport = TungsteniteWs::new(
//!     "wss://ws.okx.com:8443/ws/v5/public".to_string(),
//!     "okx".to_string(),
//! );
//! let (session, mut frames) = SocketSessionBuilder::new("okx-public", OkxCodec::public())
//!     .start(transport);
//!
//! session.subscribe(SubscriptionDescriptor::new("trades").instrument("instId", "BTC-USDT"))?;
//! while let Some(frame) = frames.recv().await {
//!     println!("{:?}", frame);
//! }
//! # Ok(())
//! # }
//! ```
pub mod backoff;
pub mod codec;
pub mod registry;
pub mod rest;
pub mod signer;
pub mod socket;
pub mod ws;

// Re-export key types for convenience
pub use backoff::{Backoff, BackoffPolicy};
pub use codec::WsCodec;
pub use registry::{SubscriptionDescriptor, SubscriptionKey, SubscriptionRegistry};
pub use rest::{ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, RestResponse};
pub use signer::{SignatureResult, Signer};
pub use socket::{ConnectionState, SocketSession, SocketSessionBuilder};
pub use ws::{TungsteniteWs, WsConfig, WsSession};
