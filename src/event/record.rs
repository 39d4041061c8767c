use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::TransactionId;

/// Monotonic outbox sequence number. Lower ids were appended first.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    pub fn new(value: u64) -> Self {
        EventId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Publication state of an outbox record.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum EventState {
    NotPublished,
    InProgress,
    Published,
    PublishFailed,
}

impl EventState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: EventState) -> bool {
        use EventState::*;
        matches!(
            (self, next),
            (NotPublished, InProgress)
                | (PublishFailed, InProgress)
                | (InProgress, Published)
                | (InProgress, PublishFailed)
        )
    }

    /// States the recovery sweeper may claim.
    pub fn is_pending(self) -> bool {
        matches!(self, EventState::NotPublished | EventState::PublishFailed)
    }

    pub fn is_terminal(self) -> bool {
        self == EventState::Published
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventState::NotPublished => "NotPublished",
            EventState::InProgress => "InProgress",
            EventState::Published => "Published",
            EventState::PublishFailed => "PublishFailed",
        };
        f.write_str(name)
    }
}

/// An integration event waiting in, or delivered from, the outbox.
///
/// `id` is zero until the store assigns one in `append`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct IntegrationEventRecord {
    pub id: EventId,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub state: EventState,
    pub transaction_id: TransactionId,
    pub times_sent: u32,
    pub state_changed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl IntegrationEventRecord {
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        payload: Vec<u8>,
        transaction_id: TransactionId,
    ) -> Self {
        let now = Utc::now();
        IntegrationEventRecord {
            id: EventId::new(0),
            event_id,
            event_type: event_type.into(),
            payload,
            created_at: now,
            state: EventState::NotPublished,
            transaction_id,
            times_sent: 0,
            state_changed_at: now,
            last_error: None,
        }
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Decode a JSON payload into a typed event.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
