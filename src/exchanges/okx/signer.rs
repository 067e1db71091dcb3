use crate::core::errors::ExchangeError;
use crate::core::kernel::{SignatureResult, Signer};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_KEY: &str = "OK-ACCESS-KEY";
pub const HEADER_SIGN: &str = "OK-ACCESS-SIGN";
pub const HEADER_TIMESTAMP: &str = "OK-ACCESS-TIMESTAMP";
pub const HEADER_PASSPHRASE: &str = "OK-ACCESS-PASSPHRASE";

/// Path signed for the streaming login
pub const LOGIN_PATH: &str = "/users/self/verify";

/// The prehash string is: timestamp + method + requestPath + body, with no
/// delimiter. The result is base64(HMAC-SHA256(secret, prehash)).
pub fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::AuthError(format!("Failed to create HMAC: {}", e)))?;

    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());

    Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// ISO-8601 UTC with millisecond precision, e.g. `2020-12-08T09:08:57.715Z`
pub fn format_timestamp(timestamp_ms: u64) -> Result<String, ExchangeError> {
    let millis = i64::try_from(timestamp_ms)
        .map_err(|_| ExchangeError::AuthError("Timestamp out of range".to_string()))?;
    let datetime = chrono::DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ExchangeError::AuthError("Invalid timestamp".to_string()))?;

    Ok(datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

pub struct OkxSigner {
    api_key: String,
    secret_key: Secret<String>,
    passphrase: Secret<String>,
}

impl OkxSigner {
    pub fn new(api_key: String, secret_key: String, passphrase: String) -> Self {
        Self {
            api_key,
            secret_key: Secret::new(secret_key),
            passphrase: Secret::new(passphrase),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        self.passphrase.expose_secret()
    }

    /// Signature for the streaming login, which uses whole seconds
    pub fn sign_login(&self, timestamp_secs: u64) -> Result<String, ExchangeError> {
        sign(
            self.secret_key.expose_secret(),
            &timestamp_secs.to_string(),
            "GET",
            LOGIN_PATH,
            "",
        )
    }
}

impl std::fmt::Debug for OkxSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxSigner")
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Signer for OkxSigner {
    fn sign_request(
        &self,
        method: &str,
        request_path: &str,
        body: &[u8],
        timestamp_ms: u64,
    ) -> SignatureResult {
        let timestamp = format_timestamp(timestamp_ms)?;

        let body = std::str::from_utf8(body)
            .map_err(|e| ExchangeError::AuthError(format!("Invalid body encoding: {}", e)))?;

        let signature = sign(
            self.secret_key.expose_secret(),
            &timestamp,
            method,
            request_path,
            body,
        )?;

        let mut headers = HashMap::with_capacity(4);
        headers.insert(HEADER_KEY.to_string(), self.api_key.clone());
        headers.insert(HEADER_SIGN.to_string(), signature);
        headers.insert(HEADER_TIMESTAMP.to_string(), timestamp);
        headers.insert(
            HEADER_PASSPHRASE.to_string(),
            self.passphrase.expose_secret().clone(),
        );

        Ok(headers)
    }
}
