use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;

/// Credentials and connection settings for one venue account.
///
/// Secrets are wrapped in [`Secret`] so `Debug` output never contains them.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub passphrase: Secret<String>,
    pub simulated: bool,
    pub proxy: Option<String>,
    pub base_url: Option<String>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for ExchangeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ExchangeConfig", 6)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("passphrase", "[REDACTED]")?;
        state.serialize_field("simulated", &self.simulated)?;
        state.serialize_field("proxy", &self.proxy)?;
        state.serialize_field("base_url", &self.base_url)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ExchangeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ExchangeConfigHelper {
            api_key: String,
            secret_key: String,
            passphrase: String,
            #[serde(default)]
            simulated: bool,
            #[serde(default)]
            proxy: Option<String>,
            #[serde(default)]
            base_url: Option<String>,
        }

        let helper = ExchangeConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            secret_key: Secret::new(helper.secret_key),
            passphrase: Secret::new(helper.passphrase),
            simulated: helper.simulated,
            proxy: helper.proxy,
            base_url: helper.base_url,
        })
    }
}

impl ExchangeConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(api_key: String, secret_key: String, passphrase: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            passphrase: Secret::new(passphrase),
            simulated: false,
            proxy: None,
            base_url: None,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY`
    /// - `{PREFIX}_SECRET_KEY`
    /// - `{PREFIX}_PASSPHRASE`
    /// - `{PREFIX}_SIMULATED` (optional, defaults to false)
    /// - `{PREFIX}_PROXY` (optional)
    /// - `{PREFIX}_BASE_URL` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let required = |name: &str| {
            let var = format!("{}_{}", prefix, name);
            env::var(&var).map_err(|_| ConfigError::MissingEnvironmentVariable(var))
        };

        let api_key = required("API_KEY")?;
        let secret_key = required("SECRET_KEY")?;
        let passphrase = required("PASSPHRASE")?;

        let simulated = match env::var(format!("{}_SIMULATED", prefix)) {
            Ok(raw) => parse_flag(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "{}_SIMULATED must be a boolean, got '{}'",
                    prefix, raw
                ))
            })?,
            Err(_) => false,
        };

        let proxy = env::var(format!("{}_PROXY", prefix))
            .ok()
            .filter(|p| !p.is_empty());
        let base_url = env::var(format!("{}_BASE_URL", prefix))
            .ok()
            .filter(|u| !u.is_empty());

        Ok(Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            passphrase: Secret::new(passphrase),
            simulated,
            proxy,
            base_url,
        })
    }

    /// Create configuration from a `.env` file and environment variables
    ///
    /// A missing file is not an error; the process environment is used as is.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Configuration for public endpoints only
    #[must_use]
    pub fn read_only() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }

    /// Check if this configuration has valid credentials for authenticated operations
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
            && !self.secret_key.expose_secret().is_empty()
            && !self.passphrase.expose_secret().is_empty()
    }

    /// Route requests to the simulated-trading environment
    #[must_use]
    pub const fn simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    /// Send REST traffic through an upstream proxy
    #[must_use]
    pub fn proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set custom base URL
    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// Get passphrase (use carefully - exposes secret)
    pub fn passphrase(&self) -> &str {
        self.passphrase.expose_secret()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_redacts_secrets() {
        let config = ExchangeConfig::new(
            "my-key".to_string(),
            "my-secret".to_string(),
            "my-pass".to_string(),
        )
        .simulated(true);

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("my-key"));
        assert!(!json.contains("my-secret"));
        assert!(!json.contains("my-pass"));
        assert!(json.contains("\"simulated\":true"));

        let debug = format!("{:?}", config);
        assert!(!debug.contains("my-secret"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: ExchangeConfig = serde_json::from_str(
            r#"{"api_key":"k","secret_key":"s","passphrase":"p"}"#,
        )
        .unwrap();
        assert!(config.has_credentials());
        assert!(!config.simulated);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_read_only_has_no_credentials() {
        assert!(!ExchangeConfig::read_only().has_credentials());

        let partial = ExchangeConfig::new("k".to_string(), "s".to_string(), String::new());
        assert!(!partial.has_credentials());
    }

    #[test]
    fn test_from_env() {
        env::set_var("OKXCFGTEST_API_KEY", "key");
        env::set_var("OKXCFGTEST_SECRET_KEY", "secret");
        env::set_var("OKXCFGTEST_PASSPHRASE", "pass");
        env::set_var("OKXCFGTEST_SIMULATED", "1");
        env::set_var("OKXCFGTEST_PROXY", "http://127.0.0.1:8080");

        let config = ExchangeConfig::from_env("okxcfgtest").unwrap();
        assert_eq!(config.api_key(), "key");
        assert_eq!(config.passphrase(), "pass");
        assert!(config.simulated);
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:8080"));
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_from_env_missing_variable() {
        let err = ExchangeConfig::from_env("okxcfgmissing").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvironmentVariable(var) if var == "OKXCFGMISSING_API_KEY"));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
