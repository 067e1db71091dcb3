use crate::core::clock::{Clock, SystemClock};
use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    ReqwestRest, RestClientBuilder, RestClientConfig, SocketSession, SocketSessionBuilder,
    SubscriptionRegistry, TungsteniteWs, WsConfig,
};
use crate::exchanges::okx::{codec::OkxCodec, rest::OkxRest, signer::OkxSigner};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::info;

pub const REST_LIVE_URL: &str = "https://aws.okx.com";
pub const REST_SIMULATED_URL: &str = "https://www.okx.com";

/// Header flagging simulated-trading requests
pub const SIMULATED_HEADER: &str = "x-simulated-trading";

/// The three streaming endpoints of the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamGroup {
    Public,
    Business,
    Private,
}

impl StreamGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Business => "business",
            Self::Private => "private",
        }
    }

    /// Default stream URL for this group
    pub fn url(self, simulated: bool) -> String {
        if simulated {
            return format!(
                "wss://wspap.okx.com:8443/ws/v5/{}?brokerId=9999",
                self.as_str()
            );
        }
        match self {
            Self::Private => "wss://wsaws.okx.com:8443/ws/v5/private".to_string(),
            group => format!("wss://ws.okx.com:8443/ws/v5/{}", group.as_str()),
        }
    }
}

/// Builder for OKX REST and streaming sessions
///
/// Host selection follows `config.simulated`; `config.base_url` overrides
/// the REST host.
pub struct OkxBuilder {
    config: ExchangeConfig,
    rest_timeout: Duration,
    ws_config: WsConfig,
    ws_urls: HashMap<StreamGroup, String>,
    clock: Arc<dyn Clock>,
}

impl OkxBuilder {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            config,
            rest_timeout: Duration::from_secs(1),
            ws_config: WsConfig::default(),
            ws_urls: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set REST client timeout
    pub fn with_rest_timeout(mut self, timeout: Duration) -> Self {
        self.rest_timeout = timeout;
        self
    }

    /// Timeouts, buffer size and backoff for every socket session
    pub fn with_ws_config(mut self, ws_config: WsConfig) -> Self {
        self.ws_config = ws_config;
        self
    }

    /// Point one stream group at a different URL
    pub fn with_ws_url(mut self, group: StreamGroup, url: String) -> Self {
        self.ws_urls.insert(group, url);
        self
    }

    /// Clock used for signing timestamps and skew checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn rest_base_url(&self) -> String {
        match &self.config.base_url {
            Some(base_url) => base_url.clone(),
            None if self.config.simulated => REST_SIMULATED_URL.to_string(),
            None => REST_LIVE_URL.to_string(),
        }
    }

    pub fn ws_url(&self, group: StreamGroup) -> String {
        self.ws_urls
            .get(&group)
            .cloned()
            .unwrap_or_else(|| group.url(self.config.simulated))
    }

    fn signer(&self) -> Option<Arc<OkxSigner>> {
        self.config.has_credentials().then(|| {
            Arc::new(OkxSigner::new(
                self.config.api_key().to_string(),
                self.config.secret_key().to_string(),
                self.config.passphrase().to_string(),
            ))
        })
    }

    /// Build the REST session
    pub fn build_rest(&self) -> Result<OkxRest<ReqwestRest>, ExchangeError> {
        let mut rest_config = RestClientConfig::new(self.rest_base_url(), "okx".to_string())
            .with_timeout(self.rest_timeout)
            .with_proxy(self.config.proxy.clone());
        if self.config.simulated {
            rest_config = rest_config.with_header(SIMULATED_HEADER, "1");
        }

        let mut rest_builder =
            RestClientBuilder::new(rest_config).with_clock(Arc::clone(&self.clock));
        if let Some(signer) = self.signer() {
            rest_builder = rest_builder.with_signer(signer);
        }

        Ok(OkxRest::new(rest_builder.build()?).with_clock(Arc::clone(&self.clock)))
    }

    /// Start a socket session for one stream group.
    ///
    /// The private group needs credentials; the business group logs in
    /// when they are present. Must be called inside a tokio runtime.
    pub fn build_socket(
        &self,
        group: StreamGroup,
        registry: Option<Arc<SubscriptionRegistry>>,
    ) -> Result<(SocketSession, mpsc::Receiver<Message>), ExchangeError> {
        let codec = match (group, self.signer()) {
            (StreamGroup::Public, _) => OkxCodec::public(),
            (_, Some(signer)) => OkxCodec::private(signer),
            (StreamGroup::Business, None) => OkxCodec::public(),
            (StreamGroup::Private, None) => {
                return Err(ExchangeError::ConfigurationError(
                    "OKX private stream requires api key, secret and passphrase".to_string(),
                ));
            }
        };

        let url = self.ws_url(group);
        info!(group = group.as_str(), %url, login = codec.requires_login(), "Starting stream");

        let transport = TungsteniteWs::new(url, "okx".to_string())
            .with_connect_timeout(self.ws_config.connect_timeout);

        let mut session = SocketSessionBuilder::new(format!("okx-{}", group.as_str()), codec)
            .with_config(self.ws_config.clone())
            .with_clock(Arc::clone(&self.clock));
        if let Some(registry) = registry {
            session = session.with_registry(registry);
        }

        Ok(session.start(transport))
    }

    pub fn build(self) -> Result<OkxClient, ExchangeError> {
        let rest = self.build_rest()?;
        Ok(OkxClient {
            rest,
            builder: self,
        })
    }
}

/// REST session plus a factory for streaming sessions
pub struct OkxClient {
    rest: OkxRest<ReqwestRest>,
    builder: OkxBuilder,
}

impl OkxClient {
    pub fn rest(&self) -> &OkxRest<ReqwestRest> {
        &self.rest
    }

    pub fn is_simulated(&self) -> bool {
        self.builder.config.simulated
    }

    /// See [`OkxBuilder::build_socket`]
    pub fn open_stream(
        &self,
        group: StreamGroup,
    ) -> Result<(SocketSession, mpsc::Receiver<Message>), ExchangeError> {
        self.builder.build_socket(group, None)
    }
}

impl std::fmt::Debug for OkxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxClient")
            .field("rest", &self.rest)
            .field("simulated", &self.builder.config.simulated)
            .finish()
    }
}
