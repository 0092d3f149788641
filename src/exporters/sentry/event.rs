use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ratelimit::Category;

const TRANSACTION_TYPE: &str = "transaction";

/// One telemetry record ready for delivery.
///
/// The transport never looks inside `payload`; it only reads `event_id` and
/// `type` to pick an endpoint and a rate-limit category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Error event with the given payload
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            event_id: None,
            event_type: None,
            payload,
        }
    }

    /// Transaction event with the given payload
    pub fn transaction(payload: Map<String, Value>) -> Self {
        Self {
            event_id: None,
            event_type: Some(TRANSACTION_TYPE.to_string()),
            payload,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn is_transaction(&self) -> bool {
        self.event_type.as_deref() == Some(TRANSACTION_TYPE)
    }

    pub fn category(&self) -> Category {
        if self.is_transaction() {
            Category::Transaction
        } else {
            Category::Error
        }
    }
}
