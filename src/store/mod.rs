//! Outbox storage.
//!
//! An [`OutboxStore`] persists [`IntegrationEventRecord`]s inside the same commit boundary
//! as the business data that triggered them. Every operation that must share that boundary
//! takes the transaction handle explicitly.

mod in_memory;
mod transaction;

use chrono::{DateTime, Utc};

use crate::error::{PersistenceError, StoreError};
use crate::event::{EventId, EventState, IntegrationEventRecord};

pub use in_memory::{InMemoryDatabase, Versioned};
pub use transaction::{Transaction, TransactionId, TransactionStatus};

/// What the outbox needs to know about the caller's transaction.
pub trait UnitOfWork {
    fn transaction_id(&self) -> TransactionId;
    fn is_active(&self) -> bool;
}

impl UnitOfWork for Transaction {
    fn transaction_id(&self) -> TransactionId {
        self.id()
    }

    fn is_active(&self) -> bool {
        Transaction::is_active(self)
    }
}

/// Durable, transactional storage for outbox records.
pub trait OutboxStore: Send + Sync {
    /// Unit-of-work handle shared with the business writes.
    type Transaction: UnitOfWork;

    /// Stage `record` in `tx`. It becomes visible only when `tx` commits.
    ///
    /// Appending the same event twice within one transaction returns the first id.
    fn append(
        &self,
        tx: &mut Self::Transaction,
        record: IntegrationEventRecord,
    ) -> Result<EventId, PersistenceError>;

    /// Compare-and-swap on the record's state.
    fn mark_state(&self, id: EventId, from: EventState, to: EventState) -> Result<(), StoreError>;

    /// `InProgress -> PublishFailed`, remembering the delivery error.
    fn mark_failed(&self, id: EventId, error: &str) -> Result<(), StoreError>;

    /// `NotPublished` and `PublishFailed` records last touched at or before `older_than`,
    /// oldest id first.
    fn list_pending(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<IntegrationEventRecord>, PersistenceError>;

    /// `InProgress` records whose attempt started at or before `older_than`.
    fn list_stalled(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<IntegrationEventRecord>, PersistenceError>;

    fn get(&self, id: EventId) -> Result<Option<IntegrationEventRecord>, PersistenceError>;
}
