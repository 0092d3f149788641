use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TrySendError};
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, Proxy, Response};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::dsn::{Dsn, DsnError};
use super::envelope::{build_request, EventRequest};
use super::event::Event;
use super::options::ClientOptions;
use super::ratelimit::RateLimits;
use super::transport::DeliveryChannel;

/// Queue capacity of a transport built with `HttpTransport::new`.
pub const DEFAULT_BUFFER_SIZE: usize = 30;

const AUTH_HEADER: &str = "X-Sentry-Auth";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid DSN: {0}")]
    Dsn(#[from] DsnError),

    #[error("failed to read CA certificates from {path:?}: {source}")]
    CaCerts {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sentry returned error: {status} - {body}")]
    SentryResponse { status: u16, body: String },

    #[error("failed to start transport worker: {0}")]
    Worker(std::io::Error),

    #[error("transport worker is not running")]
    WorkerUnavailable,
}

/// Where and how requests are sent. Rebuilt on every `configure`.
struct Endpoint {
    dsn: Dsn,
    client: Client,
    auth_header: String,
}

impl Endpoint {
    fn new(options: &ClientOptions) -> Result<Self, TransportError> {
        let dsn: Dsn = options.dsn.parse()?;

        let mut builder = Client::builder()
            .timeout(options.http_timeout)
            .user_agent(options.user_agent.clone())
            .danger_accept_invalid_certs(options.accept_invalid_certs);

        if let Some(ref proxy) = options.http_proxy {
            builder = builder.proxy(Proxy::http(proxy)?);
        }
        if let Some(ref proxy) = options.https_proxy {
            builder = builder.proxy(Proxy::https(proxy)?);
        }
        if let Some(ref path) = options.ca_certs {
            let pem = std::fs::read(path).map_err(|source| TransportError::CaCerts {
                path: path.clone(),
                source,
            })?;
            for cert in Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let auth_header = dsn.auth_header(&options.user_agent);

        Ok(Self {
            dsn,
            client: builder.build()?,
            auth_header,
        })
    }

    async fn post(&self, request: EventRequest) -> Result<Response, reqwest::Error> {
        self.client
            .post(&request.url)
            .header(CONTENT_TYPE, request.content_type)
            .header(AUTH_HEADER, &self.auth_header)
            .body(request.body)
            .send()
            .await
    }
}

enum ChannelState {
    Unconfigured,
    Ready(Arc<Endpoint>),
    Invalid(String),
}

struct QueuedRequest {
    endpoint: Arc<Endpoint>,
    request: EventRequest,
}

/// State shared between callers and the worker thread.
struct Shared {
    pending: Mutex<usize>,
    drained: Condvar,
    rate_limits: Mutex<RateLimits>,
    healthy: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            drained: Condvar::new(),
            rate_limits: Mutex::new(RateLimits::default()),
            healthy: AtomicBool::new(true),
        }
    }

    fn add_pending(&self) {
        *lock(&self.pending) += 1;
    }

    fn done_pending(&self) {
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn pending(&self) -> usize {
        *lock(&self.pending)
    }

    /// Block until nothing is pending or `timeout` elapses.
    fn wait_drained(&self, timeout: Duration) -> bool {
        let guard = lock(&self.pending);
        let (guard, _) = self
            .drained
            .wait_timeout_while(guard, timeout, |pending| *pending > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }

    fn is_rate_limited(&self, request: &EventRequest) -> bool {
        lock(&self.rate_limits).is_limited(request.category, Instant::now())
    }

    fn mark_healthy(&self) {
        if !self.healthy.swap(true, Ordering::SeqCst) {
            info!("Sentry connection recovered");
        }
    }

    fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            error!("Sentry connection unhealthy");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// HTTP delivery channel: a bounded queue drained by one background worker.
///
/// Events are serialized when enqueued and POSTed by the worker in order.
/// When the queue holds `buffer_size` requests, further events are dropped
/// until the worker catches up, so callers flush before reaching that point.
pub struct HttpTransport {
    buffer_size: usize,
    state: ChannelState,
    sender: Sender<QueuedRequest>,
    receiver: Option<Receiver<QueuedRequest>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(buffer_size.max(1));

        Self {
            buffer_size: buffer_size.max(1),
            state: ChannelState::Unconfigured,
            sender,
            receiver: Some(receiver),
            worker: None,
            shared: Arc::new(Shared::new()),
        }
    }

    /// Check if the last delivery attempt reached the server.
    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Relaxed)
    }

    /// Number of events enqueued but not yet processed by the worker.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    fn ensure_worker(&mut self) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Worker)?;

        let receiver = self
            .receiver
            .clone()
            .ok_or(TransportError::WorkerUnavailable)?;
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name("sentry-transport".to_string())
            .spawn(move || runtime.block_on(run_worker(receiver, shared)))
            .map_err(TransportError::Worker)?;

        // The worker owns the queue now; keeping a receiver here would hold
        // the channel open after the worker stops.
        self.receiver = None;
        self.worker = Some(handle);
        Ok(())
    }
}

impl DeliveryChannel for HttpTransport {
    fn configure(&mut self, options: &ClientOptions) {
        let configured = Endpoint::new(options).and_then(|endpoint| {
            self.ensure_worker()?;
            Ok(endpoint)
        });

        self.state = match configured {
            Ok(endpoint) => {
                debug!(
                    project_id = endpoint.dsn.project_id(),
                    url = %endpoint.dsn.envelope_api_url(),
                    "Sentry transport configured"
                );
                ChannelState::Ready(Arc::new(endpoint))
            }
            Err(e) => {
                debug!(error = %e, "Sentry transport configuration rejected");
                ChannelState::Invalid(e.to_string())
            }
        };
    }

    fn send_event(&self, event: Event) {
        let endpoint = match self.state {
            ChannelState::Ready(ref endpoint) => Arc::clone(endpoint),
            ChannelState::Unconfigured => {
                warn!("Sentry transport used before configure, event dropped");
                return;
            }
            ChannelState::Invalid(ref reason) => {
                error!(error = %reason, "Sentry transport misconfigured, event dropped");
                return;
            }
        };

        let request = match build_request(&event, &endpoint.dsn, Utc::now()) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Failed to serialize event, event dropped");
                return;
            }
        };

        if self.shared.is_rate_limited(&request) {
            debug!(category = request.category.as_str(), "Rate limit active, event dropped");
            return;
        }

        let category = request.category;
        self.shared.add_pending();
        match self.sender.try_send(QueuedRequest { endpoint, request }) {
            Ok(()) => {
                debug!(category = category.as_str(), "Event queued for Sentry");
            }
            Err(TrySendError::Full(_)) => {
                self.shared.done_pending();
                warn!(
                    buffer_size = self.buffer_size,
                    "Event dropped due to transport buffer being full"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.done_pending();
                error!("Sentry transport worker stopped, event dropped");
            }
        }
    }

    fn flush(&self, timeout: Duration) -> bool {
        let flushed = self.shared.wait_drained(timeout);
        if flushed {
            debug!("Sentry transport buffer flushed");
        } else {
            warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                pending = self.shared.pending(),
                "Failed to flush Sentry transport, buffer timed out"
            );
        }
        flushed
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

async fn run_worker(receiver: Receiver<QueuedRequest>, shared: Arc<Shared>) {
    debug!("Sentry transport worker started");

    while let Ok(queued) = receiver.recv().await {
        if shared.is_rate_limited(&queued.request) {
            debug!(
                category = queued.request.category.as_str(),
                "Rate limit active, queued event dropped"
            );
        } else {
            deliver(queued, &shared).await;
        }
        shared.done_pending();
    }

    debug!("Sentry transport worker stopped");
}

async fn deliver(queued: QueuedRequest, shared: &Shared) {
    let QueuedRequest { endpoint, request } = queued;
    let url = request.url.clone();
    let start = Instant::now();

    let response = match endpoint.post(request).await {
        Ok(response) => response,
        Err(e) => {
            shared.mark_unhealthy();
            let err = TransportError::Http(e);
            error!(url = %url, error = %err, "Failed to send event to Sentry");
            return;
        }
    };

    let status = response.status();
    let limits = RateLimits::from_response(status, response.headers(), Instant::now());
    if !limits.is_empty() {
        lock(&shared.rate_limits).merge(limits);
    }

    if status.is_success() {
        shared.mark_healthy();
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(url = %url, elapsed_ms, "Event sent to Sentry");
        return;
    }

    if status.is_server_error() {
        shared.mark_unhealthy();
    }
    let err = TransportError::SentryResponse {
        status: status.as_u16(),
        body: response.text().await.unwrap_or_default(),
    };
    warn!(url = %url, error = %err, "Sentry rejected event");
}
