use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(Uuid);

impl OutboxId {
    /// Creates a new random outbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relay state of an outbox record.
///
/// ```text
/// PENDING ──publish ok──> PUBLISHED ──retention──> (deleted)
///    │
///    └──attempts exhausted──> FAILED ──operator requeue──> PENDING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    /// Returns the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// Parses the persisted representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OutboxStatus::Pending),
            "PUBLISHED" => Some(OutboxStatus::Published),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event to stage in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    /// Also used as the partition key when relayed.
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            topic: topic.into(),
            payload,
        }
    }

    /// Creates an event whose payload is `payload` serialized as JSON.
    pub fn json<T: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_type,
            aggregate_id,
            event_type,
            topic,
            serde_json::to_vec(payload)?,
        ))
    }
}

/// A staged event and its relay state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    /// Failed relay attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Creates a PENDING record for `event`.
    pub fn pending(event: NewOutboxEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: OutboxId::new(),
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            topic: event.topic,
            payload: event.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at,
            published_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }
}

/// Wire format of a relayed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_type: String,
    pub aggregate_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Builds the envelope for `record`.
    ///
    /// # Errors
    ///
    /// Fails if the record payload is not valid JSON.
    pub fn for_record(record: &OutboxRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: record.event_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            timestamp: record.created_at,
            payload: serde_json::from_slice(&record.payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(payload: &[u8]) -> OutboxRecord {
        OutboxRecord::pending(
            NewOutboxEvent::new(
                "Transaction",
                "TXN-100",
                "transaction.initiated",
                "transactions",
                payload.to_vec(),
            ),
            Utc::now(),
        )
    }

    #[test]
    fn status_parses_its_own_representation() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Published,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("DELETED"), None);
    }

    #[test]
    fn pending_record_starts_clean() {
        let record = record(b"{}");
        assert!(record.is_pending());
        assert_eq!(record.attempts, 0);
        assert!(record.last_error.is_none());
        assert!(record.published_at.is_none());
    }

    #[test]
    fn envelope_uses_camel_case_fields() {
        let record = record(br#"{"amount":1500}"#);
        let envelope = EventEnvelope::for_record(&record).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["eventType"], "transaction.initiated");
        assert_eq!(json["aggregateId"], "TXN-100");
        assert_eq!(json["payload"]["amount"], 1500);
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn envelope_rejects_non_json_payload() {
        assert!(EventEnvelope::for_record(&record(b"\xff\xfe")).is_err());
    }
}
