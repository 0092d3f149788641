use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use otel_sentry_exporter::Event;
use serde_json::{Map, Value};

pub const PUBLIC_KEY: &str = "public";
pub const PROJECT_ID: &str = "42";

#[derive(Debug, Clone)]
pub struct Received {
    pub endpoint: String,
    pub auth: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Received {
    /// Event JSON carried by the request, unwrapping envelopes.
    pub fn event(&self) -> Value {
        let text = String::from_utf8(self.body.clone()).expect("body is not UTF-8");
        let json_line = match self.endpoint.as_str() {
            "envelope" => text.lines().nth(2).expect("envelope has no item payload"),
            _ => text.as_str(),
        };
        serde_json::from_str(json_line).expect("payload is not JSON")
    }
}

/// How the fake ingestion endpoint answers.
#[derive(Clone)]
pub struct Behavior {
    pub status: StatusCode,
    pub rate_limits: Option<&'static str>,
    pub delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            rate_limits: None,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
struct ServerState {
    received: Arc<Mutex<Vec<Received>>>,
    behavior: Behavior,
}

/// In-process stand-in for a Sentry ingestion endpoint.
pub struct FakeSentry {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for FakeSentry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl FakeSentry {
    pub async fn start(behavior: Behavior) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = ServerState {
            received: Arc::clone(&received),
            behavior,
        };

        let app = Router::new()
            .route("/api/:project/:endpoint/", post(ingest))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake Sentry");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake Sentry failed");
        });

        Self {
            addr,
            received,
            server,
        }
    }

    pub fn dsn(&self) -> String {
        format!("http://{}@{}/{}", PUBLIC_KEY, self.addr, PROJECT_ID)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn ingest(
    State(state): State<ServerState>,
    Path((project, endpoint)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    assert_eq!(project, PROJECT_ID);

    if !state.behavior.delay.is_zero() {
        tokio::time::sleep(state.behavior.delay).await;
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    state.received.lock().unwrap().push(Received {
        endpoint,
        auth: header("x-sentry-auth"),
        content_type: header("content-type"),
        body: body.to_vec(),
    });

    let mut response = state.behavior.status.into_response();
    if let Some(limits) = state.behavior.rate_limits {
        response
            .headers_mut()
            .insert("x-sentry-rate-limits", HeaderValue::from_static(limits));
    }
    response
}

pub fn transaction(id: usize) -> Event {
    let mut payload = Map::new();
    payload.insert("transaction".to_string(), Value::from(format!("tx-{id}")));
    Event::transaction(payload).with_event_id(format!("{id:032x}"))
}

pub fn error_event(message: &str) -> Event {
    let mut payload = Map::new();
    payload.insert("message".to_string(), Value::from(message));
    Event::new(payload)
}
