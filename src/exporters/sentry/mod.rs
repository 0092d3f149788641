mod client;
mod dsn;
mod envelope;
mod event;
mod init;
mod options;
mod ratelimit;
mod recording;
mod transport;

pub use client::{HttpTransport, TransportError, DEFAULT_BUFFER_SIZE};
pub use dsn::{Dsn, DsnError};
pub use envelope::{build_request, EventRequest};
pub use event::Event;
pub use init::SentryExporter;
pub use options::{ClientOptions, DEFAULT_HTTP_TIMEOUT};
pub use ratelimit::{Category, RateLimits};
pub use recording::RecordingTransport;
pub use transport::{
    DeliveryChannel, SentryTransport, Transport, BUFFER_FLUSH_TIMEOUT, DEFAULT_FLUSH_TIMEOUT,
};
