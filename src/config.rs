use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::exporters::sentry::ClientOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub exporters: ExportersConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExportersConfig {
    #[serde(default)]
    pub sentry: Option<SentryExporterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentryExporterConfig {
    /// Sentry DSN (e.g., "https://key@o0.ingest.sentry.io/42")
    pub dsn: String,

    /// Skip TLS certificate verification (for self-hosted instances)
    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default)]
    pub http_proxy: Option<String>,

    #[serde(default)]
    pub https_proxy: Option<String>,

    /// PEM bundle with extra root certificates
    #[serde(default)]
    pub ca_certs: Option<PathBuf>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Time budget for the final flush on shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl SentryExporterConfig {
    /// Convert to the options applied to the transport
    pub fn to_client_options(&self) -> ClientOptions {
        ClientOptions {
            dsn: self.dsn.clone(),
            http_proxy: self.http_proxy.clone(),
            https_proxy: self.https_proxy.clone(),
            ca_certs: self.ca_certs.clone(),
            accept_invalid_certs: self.insecure_skip_verify,
            http_timeout: Duration::from_secs(self.timeout_secs),
            ..Default::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Hide the key part of a DSN for logging.
fn mask_dsn(dsn: &str) -> String {
    match (dsn.find("://"), dsn.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &dsn[..scheme_end], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}

impl Config {
    /// Load config from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load config from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Print the configuration (masking secrets)
    pub fn print_config(&self) {
        match self.exporters.sentry {
            Some(ref sentry) => {
                info!("Sentry exporter: {}", mask_dsn(&sentry.dsn));
                info!(
                    "  TLS verify: {}, timeout: {}s, shutdown timeout: {}ms",
                    !sentry.insecure_skip_verify, sentry.timeout_secs, sentry.shutdown_timeout_ms
                );
                if let Some(ref ca) = sentry.ca_certs {
                    info!("  CA certs: {}", ca.display());
                }
            }
            None => info!("Sentry exporter: disabled"),
        }
    }
}
