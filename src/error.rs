use thiserror::Error;

use crate::event::{EventId, EventState};

/// Storage-layer failure: the write could not be made durable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("transaction {0} is not active")]
    TransactionNotActive(String),
    #[error("outbox store is unavailable")]
    Unavailable,
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("event record {0} not found")]
    NotFound(EventId),
    #[error("failed to serialize {what}: {details}")]
    Serialization { what: &'static str, details: String },
    #[error("snapshot error: {0}")]
    Snapshot(String),
    /// A document changed between read and commit.
    #[error("concurrent write on {collection}:{key} (expected version {expected}, actual {actual})")]
    ConcurrentWrite {
        collection: String,
        key: String,
        expected: u64,
        actual: u64,
    },
}

/// A conditional state update found the record in another state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event record {id} is {actual}, expected {expected}")]
pub struct ConflictError {
    pub id: EventId,
    pub expected: EventState,
    pub actual: EventState,
}

/// Result of a conditional update on the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// The record is in `from`, but `to` is not reachable from it.
    #[error("event record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: EventId,
        from: EventState,
        to: EventState,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
