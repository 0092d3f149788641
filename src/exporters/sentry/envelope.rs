use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::dsn::Dsn;
use super::event::Event;
use super::ratelimit::Category;

pub const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Body and destination for one event, ready to POST.
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub url: String,
    pub category: Category,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct EnvelopeHeader<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    event_id: Option<&'a str>,
    sent_at: String,
}

#[derive(Serialize)]
struct ItemHeader<'a> {
    #[serde(rename = "type")]
    item_type: &'a str,
    length: usize,
}

/// Build the request for `event`.
///
/// - Transactions go to the envelope endpoint wrapped in a single-item envelope
/// - Everything else goes to the store endpoint as plain JSON
pub fn build_request(
    event: &Event,
    dsn: &Dsn,
    sent_at: DateTime<Utc>,
) -> Result<EventRequest, serde_json::Error> {
    let payload = serde_json::to_vec(event)?;

    if !event.is_transaction() {
        return Ok(EventRequest {
            url: dsn.store_api_url(),
            category: Category::Error,
            content_type: JSON_CONTENT_TYPE,
            body: payload,
        });
    }

    let header = EnvelopeHeader {
        event_id: event.event_id.as_deref(),
        sent_at: sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    let item = ItemHeader {
        item_type: "transaction",
        length: payload.len(),
    };

    let mut body = serde_json::to_vec(&header)?;
    body.push(b'\n');
    serde_json::to_writer(&mut body, &item)?;
    body.push(b'\n');
    body.extend_from_slice(&payload);
    body.push(b'\n');

    Ok(EventRequest {
        url: dsn.envelope_api_url(),
        category: Category::Transaction,
        content_type: ENVELOPE_CONTENT_TYPE,
        body,
    })
}
