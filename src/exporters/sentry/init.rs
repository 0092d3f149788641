use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Config;
use super::{ClientOptions, Event, SentryTransport, Transport};

pub struct SentryExporter<T: Transport = SentryTransport> {
    transport: T,
    shutdown_timeout: Duration,
}

impl SentryExporter {
    pub fn try_init(config: &Config) -> Option<Self> {
        let sentry_config = config.exporters.sentry.as_ref()?;

        let exporter = Self::with_transport(
            SentryTransport::new(),
            sentry_config.to_client_options(),
            sentry_config.shutdown_timeout(),
        );

        info!("Sentry exporter initialized");

        Some(exporter)
    }
}

impl<T: Transport> SentryExporter<T> {
    /// Configure `transport` once and wrap it.
    pub fn with_transport(
        mut transport: T,
        options: ClientOptions,
        shutdown_timeout: Duration,
    ) -> Self {
        transport.configure(options);
        Self {
            transport,
            shutdown_timeout,
        }
    }

    /// Forward already-translated events to the transport.
    pub fn export(&mut self, events: Vec<Event>) {
        self.transport.send_events(events);
    }

    /// Flush pending events within the configured shutdown budget.
    pub fn shutdown(&mut self) -> bool {
        let deadline = Instant::now() + self.shutdown_timeout;
        let flushed = self.transport.flush(Some(deadline));
        if flushed {
            info!("Sentry exporter shut down");
        } else {
            warn!(
                timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                "Failed to flush Sentry exporter, telemetry may have been lost"
            );
        }
        flushed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
