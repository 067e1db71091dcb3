pub mod clock;
pub mod config;
pub mod errors;
pub mod kernel;
