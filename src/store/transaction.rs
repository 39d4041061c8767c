use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::in_memory::InMemoryDatabase;
use crate::error::PersistenceError;
use crate::event::IntegrationEventRecord;

/// Correlates outbox records with the business transaction that wrote them.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

/// A document write staged inside a transaction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StagedWrite {
    pub collection: String,
    pub key: String,
    pub value: Vec<u8>,
    /// Version the document must have at commit. `Some(0)` means it must not exist.
    pub expected_version: Option<u64>,
}

/// Explicit unit of work for an [`InMemoryDatabase`].
///
/// Business writes and outbox appends are staged here and become visible together on
/// [`commit`](Transaction::commit). Dropping an active transaction rolls it back.
pub struct Transaction {
    id: TransactionId,
    status: TransactionStatus,
    writes: Vec<StagedWrite>,
    events: Vec<IntegrationEventRecord>,
    db: InMemoryDatabase,
}

impl Transaction {
    pub(crate) fn begin(db: InMemoryDatabase) -> Self {
        Transaction {
            id: TransactionId::new(),
            status: TransactionStatus::Active,
            writes: Vec::new(),
            events: Vec::new(),
            db,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Stage a JSON document write.
    pub fn put<T: Serialize>(
        &mut self,
        collection: &str,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), PersistenceError> {
        self.stage_write(collection, key.into(), value, None)
    }

    /// Stage a write that only commits if the document is still at `expected_version`
    /// (0 = absent). Otherwise the whole commit fails with
    /// [`PersistenceError::ConcurrentWrite`].
    pub fn put_expecting<T: Serialize>(
        &mut self,
        collection: &str,
        key: impl Into<String>,
        value: &T,
        expected_version: u64,
    ) -> Result<(), PersistenceError> {
        self.stage_write(collection, key.into(), value, Some(expected_version))
    }

    fn stage_write<T: Serialize>(
        &mut self,
        collection: &str,
        key: String,
        value: &T,
        expected_version: Option<u64>,
    ) -> Result<(), PersistenceError> {
        self.ensure_active()?;
        let value = serde_json::to_vec(value).map_err(|e| PersistenceError::Serialization {
            what: "document",
            details: e.to_string(),
        })?;
        self.writes
            .retain(|w| !(w.collection == collection && w.key == key));
        self.writes.push(StagedWrite {
            collection: collection.to_string(),
            key,
            value,
            expected_version,
        });
        Ok(())
    }

    /// Atomically apply every staged write and outbox record.
    ///
    /// On failure nothing is applied and the transaction is rolled back.
    pub fn commit(&mut self) -> Result<(), PersistenceError> {
        self.ensure_active()?;
        let writes = std::mem::take(&mut self.writes);
        let events = std::mem::take(&mut self.events);
        let event_count = events.len();

        match self.db.apply(writes, events) {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                tracing::debug!(transaction_id = %self.id, events = event_count, "Transaction committed");
                Ok(())
            }
            Err(err) => {
                self.status = TransactionStatus::RolledBack;
                tracing::warn!(transaction_id = %self.id, error = %err, "Transaction commit failed");
                Err(err)
            }
        }
    }

    /// Discard every staged write and outbox record.
    pub fn rollback(&mut self) {
        if self.is_active() {
            self.writes.clear();
            self.events.clear();
            self.status = TransactionStatus::RolledBack;
            tracing::debug!(transaction_id = %self.id, "Transaction rolled back");
        }
    }

    pub(crate) fn ensure_active(&self) -> Result<(), PersistenceError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(PersistenceError::TransactionNotActive(self.id.to_string()))
        }
    }

    pub(crate) fn belongs_to(&self, db: &InMemoryDatabase) -> bool {
        self.db.same_as(db)
    }

    pub(crate) fn staged_events(&self) -> &[IntegrationEventRecord] {
        &self.events
    }

    pub(crate) fn stage_event(&mut self, record: IntegrationEventRecord) {
        self.events.push(record);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("writes", &self.writes.len())
            .field("events", &self.events.len())
            .finish()
    }
}
