pub mod config;
pub mod exporters;

// Re-exports for public API
pub use config::{Config, ConfigError, SentryExporterConfig};
pub use exporters::sentry::{
    ClientOptions, DeliveryChannel, Event, HttpTransport, RecordingTransport, SentryExporter,
    SentryTransport, Transport,
};
