use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::client::HttpTransport;
use super::event::Event;
use super::options::ClientOptions;

/// Wait used by `flush` when the caller gives no deadline.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Wait used when `send_events` flushes on its own at the buffer boundary.
pub const BUFFER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// The mechanism that actually moves events over the wire.
pub trait DeliveryChannel: Send {
    /// Replace the channel's connection settings. Errors surface on first use.
    fn configure(&mut self, options: &ClientOptions);

    /// Hand one event over for asynchronous delivery.
    fn send_event(&self, event: Event);

    /// Block until every handed-over event was processed or `timeout` elapses.
    fn flush(&self, timeout: Duration) -> bool;

    /// Pending events the channel holds before it must be flushed.
    fn buffer_size(&self) -> usize;
}

/// Used by the exporter to send events to Sentry.
pub trait Transport: Send {
    fn configure(&mut self, options: ClientOptions);

    /// Submit `events` in order. Delivery failures are not reported.
    fn send_events(&mut self, events: Vec<Event>);

    /// Wait for pending events until `deadline`, or `DEFAULT_FLUSH_TIMEOUT`
    /// when there is none. Returns false if the budget ran out first.
    fn flush(&mut self, deadline: Option<Instant>) -> bool;
}

/// Sends events through a delivery channel without ever overrunning its buffer.
pub struct SentryTransport<C: DeliveryChannel = HttpTransport> {
    channel: C,
    /// Events handed to the channel since it was last flushed.
    buffer_counter: usize,
}

impl SentryTransport<HttpTransport> {
    /// Transport backed by an unconfigured `HttpTransport`.
    pub fn new() -> Self {
        Self::with_channel(HttpTransport::new())
    }
}

impl Default for SentryTransport<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: DeliveryChannel> SentryTransport<C> {
    pub fn with_channel(channel: C) -> Self {
        Self {
            channel,
            buffer_counter: 0,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn buffer_counter(&self) -> usize {
        self.buffer_counter
    }
}

impl<C: DeliveryChannel> Transport for SentryTransport<C> {
    fn configure(&mut self, options: ClientOptions) {
        self.channel.configure(&options);
    }

    fn send_events(&mut self, events: Vec<Event>) {
        let buffer_size = self.channel.buffer_size();

        for event in events {
            // The channel drops events once its buffer is full, so drain it
            // before handing over the next one.
            if self.buffer_counter >= buffer_size {
                if !self.channel.flush(BUFFER_FLUSH_TIMEOUT) {
                    warn!(
                        buffer_size,
                        "Transport buffer did not drain in time, events may be dropped"
                    );
                }
                self.buffer_counter = 0;
            }

            self.channel.send_event(event);
            self.buffer_counter += 1;
        }
    }

    fn flush(&mut self, deadline: Option<Instant>) -> bool {
        let timeout = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => DEFAULT_FLUSH_TIMEOUT,
        };

        let flushed = self.channel.flush(timeout);
        if flushed {
            self.buffer_counter = 0;
        }
        debug!(
            flushed,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Sentry transport flush finished"
        );
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Configure(String),
        Send(Option<String>),
        Flush(Duration),
    }

    /// Channel that records calls and drains instantly unless `stuck`.
    #[derive(Clone, Default)]
    struct RecordingChannel {
        calls: Arc<Mutex<Vec<Call>>>,
        pending: Arc<Mutex<usize>>,
        buffer_size: usize,
        stuck: bool,
    }

    impl RecordingChannel {
        fn with_buffer_size(buffer_size: usize) -> Self {
            Self {
                buffer_size,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn flushes(&self) -> Vec<Duration> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Flush(timeout) => Some(timeout),
                    _ => None,
                })
                .collect()
        }
    }

    impl DeliveryChannel for RecordingChannel {
        fn configure(&mut self, options: &ClientOptions) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Configure(options.dsn.clone()));
        }

        fn send_event(&self, event: Event) {
            *self.pending.lock().unwrap() += 1;
            self.calls.lock().unwrap().push(Call::Send(event.event_id));
        }

        fn flush(&self, timeout: Duration) -> bool {
            self.calls.lock().unwrap().push(Call::Flush(timeout));
            let mut pending = self.pending.lock().unwrap();
            if !self.stuck {
                *pending = 0;
            }
            *pending == 0
        }

        fn buffer_size(&self) -> usize {
            self.buffer_size
        }
    }

    fn events(count: usize) -> Vec<Event> {
        (0..count)
            .map(|i| Event::transaction(Map::<String, Value>::new()).with_event_id(i.to_string()))
            .collect()
    }

    fn transport(buffer_size: usize) -> (SentryTransport<RecordingChannel>, RecordingChannel) {
        let channel = RecordingChannel::with_buffer_size(buffer_size);
        (SentryTransport::with_channel(channel.clone()), channel)
    }

    #[test]
    fn test_batch_below_capacity_never_flushes() {
        for size in 0..5 {
            let (mut transport, channel) = transport(5);
            transport.send_events(events(size));
            assert!(channel.flushes().is_empty(), "batch of {size} flushed");
            assert_eq!(transport.buffer_counter(), size);
        }
    }

    #[test]
    fn test_capacity_two_batch_of_five() {
        let (mut transport, channel) = transport(2);
        transport.send_events(events(5));

        let send = |i: usize| Call::Send(Some(i.to_string()));
        let flush = Call::Flush(BUFFER_FLUSH_TIMEOUT);
        assert_eq!(
            channel.calls(),
            vec![
                send(0),
                send(1),
                flush.clone(),
                send(2),
                send(3),
                flush,
                send(4),
            ]
        );
        assert_eq!(transport.buffer_counter(), 1);

        // The trailing event is only drained by the caller's flush.
        assert!(transport.flush(Some(Instant::now() + Duration::from_secs(1))));
        assert_eq!(transport.buffer_counter(), 0);
    }

    #[test]
    fn test_exact_multiple_flushes_once_per_capacity_in_steady_state() {
        let (mut transport, channel) = transport(3);
        transport.send_events(events(3));
        assert!(channel.flushes().is_empty());

        transport.send_events(events(9));
        assert_eq!(channel.flushes(), vec![BUFFER_FLUSH_TIMEOUT; 3]);
        assert_eq!(transport.buffer_counter(), 3);
    }

    #[test]
    fn test_fresh_transport_exact_multiple() {
        let (mut transport, channel) = transport(2);
        transport.send_events(events(6));
        assert_eq!(channel.flushes().len(), 2);
    }

    #[test]
    fn test_order_is_preserved() {
        let (mut transport, channel) = transport(100);
        transport.send_events(events(10));

        let sent: Vec<Option<String>> = channel
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(id) => Some(id),
                _ => None,
            })
            .collect();
        let expected: Vec<Option<String>> = (0..10).map(|i| Some(i.to_string())).collect();
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let (mut transport, channel) = transport(1);
        transport.send_events(Vec::new());
        assert!(channel.calls().is_empty());
        assert_eq!(transport.buffer_counter(), 0);
    }

    #[test]
    fn test_counter_persists_across_batches() {
        let (mut transport, channel) = transport(2);
        transport.send_events(events(1));
        transport.send_events(events(1));
        assert!(channel.flushes().is_empty());

        transport.send_events(events(1));
        assert_eq!(channel.flushes().len(), 1);
        assert_eq!(transport.buffer_counter(), 1);
    }

    #[test]
    fn test_confirmed_flush_resets_counter() {
        let (mut transport, channel) = transport(2);
        transport.send_events(events(2));
        assert!(transport.flush(None));

        transport.send_events(events(2));
        assert_eq!(channel.flushes(), vec![DEFAULT_FLUSH_TIMEOUT]);
    }

    #[test]
    fn test_failed_flush_keeps_counter() {
        let channel = RecordingChannel {
            buffer_size: 4,
            stuck: true,
            ..Default::default()
        };
        let mut transport = SentryTransport::with_channel(channel);
        transport.send_events(events(3));

        assert!(!transport.flush(None));
        assert_eq!(transport.buffer_counter(), 3);
    }

    #[test]
    fn test_flush_without_deadline_uses_default() {
        let (mut transport, channel) = transport(2);
        assert!(transport.flush(None));
        assert_eq!(channel.flushes(), vec![DEFAULT_FLUSH_TIMEOUT]);
    }

    #[test]
    fn test_flush_with_deadline_uses_remaining_time() {
        let (mut transport, channel) = transport(2);
        transport.flush(Some(Instant::now() + Duration::from_secs(5)));

        let timeout = channel.flushes()[0];
        assert!(timeout <= Duration::from_secs(5));
        assert!(timeout > Duration::from_secs(4));
    }

    #[test]
    fn test_flush_with_past_deadline() {
        let channel = RecordingChannel {
            buffer_size: 4,
            stuck: true,
            ..Default::default()
        };
        let mut transport = SentryTransport::with_channel(channel.clone());
        let past = Instant::now() - Duration::from_millis(1);

        // Nothing pending: succeeds even with no time left.
        assert!(transport.flush(Some(past)));

        transport.send_events(events(1));
        assert!(!transport.flush(Some(past)));
        assert_eq!(channel.flushes(), vec![Duration::ZERO, Duration::ZERO]);
    }

    #[test]
    fn test_configure_forwards_options() {
        let (mut transport, channel) = transport(2);
        let options = ClientOptions::with_dsn("https://key@sentry.example.com/1");
        transport.configure(options.clone());
        transport.configure(options);

        assert_eq!(
            channel.calls(),
            vec![
                Call::Configure("https://key@sentry.example.com/1".to_string()),
                Call::Configure("https://key@sentry.example.com/1".to_string()),
            ]
        );
        assert_eq!(transport.buffer_counter(), 0);
    }

    #[test]
    fn test_http_transport_configure_is_idempotent() {
        let mut transport = SentryTransport::new();
        let options = ClientOptions::with_dsn("http://key@127.0.0.1:9/1");
        transport.configure(options.clone());
        transport.configure(options);

        assert_eq!(transport.channel().buffer_size(), 30);
        assert_eq!(transport.channel().pending(), 0);
        assert!(transport.flush(None));
    }

    #[test]
    fn test_payload_is_not_inspected() {
        let (mut transport, channel) = transport(2);
        let payload = json!({"spans": [{"op": "db"}], "nested": {"deep": [1, 2, 3]}});
        let event = Event::new(payload.as_object().cloned().unwrap()).with_event_id("x");
        transport.send_events(vec![event]);
        assert_eq!(channel.calls(), vec![Call::Send(Some("x".to_string()))]);
    }
}
