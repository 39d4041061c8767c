use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::transaction::{StagedWrite, Transaction};
use super::OutboxStore;
use crate::error::{ConflictError, PersistenceError, StoreError};
use crate::event::{EventId, EventState, IntegrationEventRecord};

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    bytes: Vec<u8>,
    version: u64,
}

/// A committed document and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub data: T,
    pub version: u64,
}

#[derive(Default, Serialize, Deserialize)]
struct Tables {
    documents: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    outbox: BTreeMap<EventId, IntegrationEventRecord>,
}

impl Tables {
    fn document_version(&self, collection: &str, key: &str) -> u64 {
        self.documents
            .get(collection)
            .and_then(|c| c.get(key))
            .map_or(0, |doc| doc.version)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    tables: Tables,
}

/// Transactional in-memory engine holding business documents and the outbox side by side.
///
/// Cloning yields another handle to the same storage.
#[derive(Clone)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<Tables>>,
    seq: Arc<AtomicU64>,
    available: Arc<AtomicBool>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::from_parts(Tables::default(), 1)
    }

    fn from_parts(tables: Tables, next_id: u64) -> Self {
        InMemoryDatabase {
            tables: Arc::new(RwLock::new(tables)),
            seq: Arc::new(AtomicU64::new(next_id)),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Open a new transaction.
    pub fn begin(&self) -> Result<Transaction, PersistenceError> {
        self.ensure_available()?;
        Ok(Transaction::begin(self.clone()))
    }

    /// Read a committed JSON document.
    pub fn get_document<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, PersistenceError> {
        Ok(self.get_versioned(collection, key)?.map(|doc| doc.data))
    }

    /// Read a committed JSON document with its version, for use with
    /// [`Transaction::put_expecting`].
    pub fn get_versioned<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Versioned<T>>, PersistenceError> {
        self.ensure_available()?;
        let tables = self.read("document read")?;
        let Some(stored) = tables.documents.get(collection).and_then(|c| c.get(key)) else {
            return Ok(None);
        };
        let data = serde_json::from_slice(&stored.bytes).map_err(|e| PersistenceError::Serialization {
            what: "document",
            details: e.to_string(),
        })?;
        Ok(Some(Versioned {
            data,
            version: stored.version,
        }))
    }

    /// Number of committed outbox records in any state.
    pub fn outbox_len(&self) -> Result<usize, PersistenceError> {
        Ok(self.read("outbox read")?.outbox.len())
    }

    /// Make every subsequent operation fail with [`PersistenceError::Unavailable`].
    pub fn shutdown(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    /// Serialize the committed state, as a durable engine would hold it across restarts.
    pub fn snapshot(&self) -> Result<Vec<u8>, PersistenceError> {
        let tables = self.read("snapshot")?;
        let snapshot = SnapshotRef {
            next_id: self.seq.load(Ordering::SeqCst),
            tables: &tables,
        };
        bitcode::serialize(&snapshot).map_err(|e| PersistenceError::Snapshot(e.to_string()))
    }

    /// Rebuild a database from [`snapshot`](Self::snapshot) bytes.
    pub fn restore(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let snapshot: Snapshot =
            bitcode::deserialize(bytes).map_err(|e| PersistenceError::Snapshot(e.to_string()))?;
        Ok(Self::from_parts(snapshot.tables, snapshot.next_id))
    }

    pub(crate) fn same_as(&self, other: &InMemoryDatabase) -> bool {
        Arc::ptr_eq(&self.tables, &other.tables)
    }

    pub(crate) fn apply(
        &self,
        writes: Vec<StagedWrite>,
        events: Vec<IntegrationEventRecord>,
    ) -> Result<(), PersistenceError> {
        self.ensure_available()?;
        let mut tables = self.write("commit")?;

        for write in &writes {
            let Some(expected) = write.expected_version else {
                continue;
            };
            let actual = tables.document_version(&write.collection, &write.key);
            if actual != expected {
                return Err(PersistenceError::ConcurrentWrite {
                    collection: write.collection.clone(),
                    key: write.key.clone(),
                    expected,
                    actual,
                });
            }
        }

        for write in writes {
            let collection = tables.documents.entry(write.collection).or_default();
            let version = collection.get(&write.key).map_or(0, |doc| doc.version) + 1;
            collection.insert(
                write.key,
                StoredDocument {
                    bytes: write.value,
                    version,
                },
            );
        }
        for record in events {
            tables.outbox.insert(record.id, record);
        }
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), PersistenceError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::Unavailable)
        }
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Tables>, PersistenceError> {
        self.tables
            .read()
            .map_err(|_| PersistenceError::LockPoisoned(operation))
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Tables>, PersistenceError> {
        self.tables
            .write()
            .map_err(|_| PersistenceError::LockPoisoned(operation))
    }

    fn list_where<F>(&self, limit: usize, keep: F) -> Result<Vec<IntegrationEventRecord>, PersistenceError>
    where
        F: Fn(&IntegrationEventRecord) -> bool,
    {
        self.ensure_available()?;
        let tables = self.read("outbox read")?;
        Ok(tables
            .outbox
            .values()
            .filter(|record| keep(record))
            .take(limit)
            .cloned()
            .collect())
    }

    fn transition(
        &self,
        id: EventId,
        from: EventState,
        to: EventState,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tables = self.write("outbox write")?;
        let record = tables
            .outbox
            .get_mut(&id)
            .ok_or(PersistenceError::NotFound(id))?;

        if record.state != from {
            return Err(ConflictError {
                id,
                expected: from,
                actual: record.state,
            }
            .into());
        }
        // `from` is the stored state from here on.
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from, to });
        }

        record.state = to;
        record.state_changed_at = Utc::now();
        match to {
            EventState::InProgress => record.times_sent = record.times_sent.saturating_add(1),
            EventState::Published => record.last_error = None,
            EventState::PublishFailed => record.last_error = error.map(str::to_string),
            EventState::NotPublished => {}
        }
        Ok(())
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    next_id: u64,
    tables: &'a Tables,
}

impl OutboxStore for InMemoryDatabase {
    type Transaction = Transaction;

    fn append(
        &self,
        tx: &mut Transaction,
        mut record: IntegrationEventRecord,
    ) -> Result<EventId, PersistenceError> {
        self.ensure_available()?;
        tx.ensure_active()?;
        if !tx.belongs_to(self) {
            return Err(PersistenceError::TransactionNotActive(tx.id().to_string()));
        }

        if let Some(existing) = tx
            .staged_events()
            .iter()
            .find(|staged| staged.event_id == record.event_id)
        {
            tracing::debug!(event_id = %existing.id, "Event already appended in this transaction");
            return Ok(existing.id);
        }

        let id = EventId::new(self.seq.fetch_add(1, Ordering::SeqCst));
        record.id = id;
        record.transaction_id = tx.id();
        record.state = EventState::NotPublished;
        tx.stage_event(record);
        Ok(id)
    }

    fn mark_state(&self, id: EventId, from: EventState, to: EventState) -> Result<(), StoreError> {
        self.transition(id, from, to, None)
    }

    fn mark_failed(&self, id: EventId, error: &str) -> Result<(), StoreError> {
        self.transition(id, EventState::InProgress, EventState::PublishFailed, Some(error))
    }

    fn list_pending(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<IntegrationEventRecord>, PersistenceError> {
        self.list_where(limit, |record| {
            record.state.is_pending() && record.state_changed_at <= older_than
        })
    }

    fn list_stalled(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<IntegrationEventRecord>, PersistenceError> {
        self.list_where(limit, |record| {
            record.state == EventState::InProgress && record.state_changed_at <= older_than
        })
    }

    fn get(&self, id: EventId) -> Result<Option<IntegrationEventRecord>, PersistenceError> {
        self.ensure_available()?;
        Ok(self.read("outbox read")?.outbox.get(&id).cloned())
    }
}
