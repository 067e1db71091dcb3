//! Shared fixtures for the integration tests

#![allow(dead_code)]

use okx_session::core::config::ExchangeConfig;
use std::sync::Once;
use wiremock::MockServer;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("okx_session=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Simulated venue REST host
pub async fn setup_mock_server() -> MockServer {
    init_tracing();
    MockServer::start().await
}

pub fn test_credentials(secret: &str) -> ExchangeConfig {
    ExchangeConfig::new(
        "test-key".to_string(),
        secret.to_string(),
        "test-passphrase".to_string(),
    )
}

/// `{code:"0", msg:"", data}`
pub fn envelope(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "code": "0", "msg": "", "data": data })
}
