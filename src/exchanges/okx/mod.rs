pub mod builder;
pub mod codec;
pub mod endpoints;
pub mod handlers;
pub mod rest;
pub mod router;
pub mod signer;
pub mod types;

// Re-export main components
pub use builder::{OkxBuilder, OkxClient, StreamGroup};
pub use codec::{OkxCodec, OkxEvent, OkxMessage, OkxPush};
pub use endpoints::{Endpoint, HttpMethod};
pub use handlers::{BookEvent, BookStore, ForwardHandler, OrderBook, OrderBookHandler, TradesHandler};
pub use rest::{OkxRest, MAX_CLOCK_SKEW_MS};
pub use router::{ChannelHandler, MessageRouter, Route};
pub use signer::OkxSigner;
pub use types::{
    BookLevel, Candle, OkxOrderBook, OkxResponse, OkxTicker, OkxTrade, OkxWsChannel, OkxWsRequest,
    SystemTime,
};
