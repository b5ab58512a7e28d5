use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConsumerError;

/// Name of the stream entry field holding the JSON payload.
pub const PAYLOAD_FIELD: &str = "payload";

/// A telemetry notification as published on the stream. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub device_id: Uuid,
    pub tenant_id: Uuid,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One entry read from the stream, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub payload: Option<String>,
}

impl StreamEntry {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload.into()),
        }
    }

    pub fn decode(&self) -> Result<TelemetryEvent, ConsumerError> {
        let payload = self.payload.as_deref().ok_or_else(|| {
            ConsumerError::Parse(format!("entry {} has no {PAYLOAD_FIELD} field", self.id))
        })?;

        serde_json::from_str(payload)
            .map_err(|e| ConsumerError::Parse(format!("entry {}: {e}", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_event() {
        let device_id = Uuid::now_v7();
        let tenant_id = Uuid::now_v7();
        let entry = StreamEntry::new(
            "1-0",
            format!(r#"{{"device_id":"{device_id}","tenant_id":"{tenant_id}","vendor":"x"}}"#),
        );

        let event = entry.decode().unwrap();
        assert_eq!(event.device_id, device_id);
        assert_eq!(event.tenant_id, tenant_id);
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let entry = StreamEntry::new("1-0", format!(r#"{{"device_id":"{}"}}"#, Uuid::now_v7()));
        assert!(matches!(entry.decode(), Err(ConsumerError::Parse(_))));

        let entry = StreamEntry {
            id: "1-1".to_string(),
            payload: None,
        };
        assert!(matches!(entry.decode(), Err(ConsumerError::Parse(_))));

        let entry = StreamEntry::new("1-2", "not json");
        assert!(matches!(entry.decode(), Err(ConsumerError::Parse(_))));
    }
}
