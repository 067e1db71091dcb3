pub mod core;
pub mod exchanges;

pub use core::{
    clock::{Clock, ManualClock, SystemClock},
    config::ExchangeConfig,
    errors::ExchangeError,
};
pub use exchanges::okx::{OkxBuilder, OkxClient, StreamGroup};
