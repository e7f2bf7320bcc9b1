//! Upstream HTTP client
//!
//! One pooled hyper client shared by every plain-HTTP exchange. It speaks
//! both `http://` and `https://` so absolute-form targets of either scheme can
//! be forwarded.

use hyper::client::{HttpConnector, ResponseFuture};
use hyper::{Body, Client, Request};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::time::Duration;
use tracing::info;

use crate::config::HttpClientConfig;

/// Configuration for the pooled client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum idle connections per host (default: 50)
    pub max_idle_per_host: usize,
    /// How long to keep idle connections alive (default: 90 seconds)
    pub idle_timeout: Duration,
    /// Timeout for establishing new connections (default: 10 seconds)
    pub connect_timeout: Duration,
    /// TCP keepalive interval, `None` disables keepalive
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&HttpClientConfig::default())
    }
}

impl From<&HttpClientConfig> for ClientConfig {
    fn from(config: &HttpClientConfig) -> Self {
        Self {
            max_idle_per_host: config.max_idle_per_host,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            connect_timeout: config.connect_timeout(),
            tcp_keepalive: config
                .tcp_keepalive
                .then(|| Duration::from_secs(config.tcp_keepalive_interval_secs)),
        }
    }
}

/// Shared HTTP/HTTPS client with connection pooling
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn from_config(config: &HttpClientConfig) -> Self {
        Self::with_config(ClientConfig::from(config))
    }

    pub fn with_config(config: ClientConfig) -> Self {
        info!("🚀 Initializing upstream HTTP client");
        info!("   Max idle connections per host: {}", config.max_idle_per_host);
        info!("   Idle timeout: {:?}", config.idle_timeout);
        info!("   Connect timeout: {:?}", config.connect_timeout);

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(config.connect_timeout));
        http_connector.set_nodelay(true);
        http_connector.set_keepalive(config.tcp_keepalive);

        // Bundled webpki roots, independent of the host trust store
        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder()
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(https_connector);

        Self { client, config }
    }

    /// Perform a single round trip to the origin
    pub fn request(&self, request: Request<Body>) -> ResponseFuture {
        self.client.request(request)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}
