use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::event::Event;
use super::options::ClientOptions;
use super::transport::Transport;

#[derive(Debug, Default)]
struct Recorded {
    configured: Vec<ClientOptions>,
    batches: Vec<Vec<Event>>,
    flushes: Vec<Option<Instant>>,
}

/// In-memory `Transport` that records every call instead of sending.
///
/// Clones share the same recording, so a test can keep one handle while the
/// exporter owns the other.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    recorded: Arc<Mutex<Recorded>>,
    flush_result: bool,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            flush_result: true,
        }
    }

    /// Transport whose `flush` always reports `result`.
    pub fn with_flush_result(result: bool) -> Self {
        Self {
            flush_result: result,
            ..Self::new()
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn configured(&self) -> Vec<ClientOptions> {
        self.recorded().configured.clone()
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.recorded().batches.clone()
    }

    /// All events across batches, in submission order.
    pub fn events(&self) -> Vec<Event> {
        self.recorded().batches.iter().flatten().cloned().collect()
    }

    pub fn flushes(&self) -> Vec<Option<Instant>> {
        self.recorded().flushes.clone()
    }
}

impl Transport for RecordingTransport {
    fn configure(&mut self, options: ClientOptions) {
        self.recorded().configured.push(options);
    }

    fn send_events(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        self.recorded().batches.push(events);
    }

    fn flush(&mut self, deadline: Option<Instant>) -> bool {
        self.recorded().flushes.push(deadline);
        self.flush_result
    }
}
