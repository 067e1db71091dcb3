use crate::core::errors::ExchangeError;
use std::collections::HashMap;

/// Result type for signing operations: headers to attach to the request
pub type SignatureResult = Result<HashMap<String, String>, ExchangeError>;

/// Signer trait for request authentication
///
/// Implementations receive the exact bytes that will be sent on the wire, so
/// the signature and the body can never drift apart.
pub trait Signer: Send + Sync {
    /// Sign a request and return the authentication headers
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `request_path` - Path including the `?query` part, if any
    /// * `body` - Raw request body bytes (empty for bodyless requests)
    /// * `timestamp_ms` - Request timestamp in milliseconds since the epoch
    fn sign_request(
        &self,
        method: &str,
        request_path: &str,
        body: &[u8],
        timestamp_ms: u64,
    ) -> SignatureResult;
}
