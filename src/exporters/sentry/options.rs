use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings applied to a transport through `configure`.
///
/// Nothing is checked here; a bad DSN or certificate path only shows up when
/// the transport is first used.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Endpoint and credentials, e.g. "https://key@o0.ingest.sentry.io/42"
    pub dsn: String,

    /// Proxy for plain HTTP endpoints
    pub http_proxy: Option<String>,

    /// Proxy for HTTPS endpoints
    pub https_proxy: Option<String>,

    /// PEM bundle with extra root certificates
    pub ca_certs: Option<PathBuf>,

    /// Skip TLS certificate verification
    pub accept_invalid_certs: bool,

    /// Per-request timeout
    pub http_timeout: Duration,

    /// Sent as `User-Agent` and as `sentry_client` in the auth header
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            http_proxy: None,
            https_proxy: None,
            ca_certs: None,
            accept_invalid_certs: false,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            user_agent: default_user_agent(),
        }
    }
}

impl ClientOptions {
    pub fn with_dsn(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Default::default()
        }
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
