//! Integration event log service.
//!
//! Publication has two distinct phases:
//! 1. **Save** ([`save_event`](IntegrationEventLogService::save_event)) - append the event to
//!    the outbox inside the caller's transaction. No transport I/O happens here, so the
//!    business write and the intent to notify commit or roll back together.
//! 2. **Publish** ([`publish_event`](IntegrationEventLogService::publish_event)) - after
//!    commit, claim the record with a conditional update and hand it to the publisher.
//!    A transport failure is recorded on the record and left to the recovery sweeper; it
//!    never undoes the committed business write.

use tracing::{debug, info, warn};

use crate::error::{PersistenceError, StoreError};
use crate::event::{EventId, EventState, IntegrationEvent, IntegrationEventRecord};
use crate::publisher::{Ack, Publisher, TransportError};
use crate::store::{OutboxStore, UnitOfWork};

/// Result of one claim-and-publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The transport acknowledged the event and the record is `Published`.
    Published(Ack),
    /// Another actor owns the record right now, or it is already done.
    Skipped { actual: EventState },
    /// The transport failed; the record is `PublishFailed` and will be retried.
    Failed(TransportError),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, PublishOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PublishOutcome::Failed(_))
    }
}

pub struct IntegrationEventLogService<S, P> {
    store: S,
    publisher: P,
}

impl<S, P> IntegrationEventLogService<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<S: OutboxStore, P: Publisher> IntegrationEventLogService<S, P> {
    /// Append `event` to the outbox as part of `tx`.
    ///
    /// An error here means the notification cannot be made durable, so the caller must
    /// fail the whole business operation.
    pub fn save_event<E: IntegrationEvent>(
        &self,
        tx: &mut S::Transaction,
        event: &E,
    ) -> Result<EventId, PersistenceError> {
        let record = event.to_record(tx.transaction_id())?;
        self.save_record(tx, record)
    }

    /// Append a pre-built record as part of `tx`.
    pub fn save_record(
        &self,
        tx: &mut S::Transaction,
        record: IntegrationEventRecord,
    ) -> Result<EventId, PersistenceError> {
        let event_type = record.event_type.clone();
        let transaction_id = tx.transaction_id();
        let id = self.store.append(tx, record)?;
        debug!(
            event_id = %id,
            event_type = %event_type,
            transaction_id = %transaction_id,
            "Integration event saved"
        );
        Ok(id)
    }

    /// Publish a freshly committed record.
    ///
    /// Call only after the transaction that saved `id` has committed.
    pub fn publish_event(&self, id: EventId) -> Result<PublishOutcome, PersistenceError> {
        self.claim_and_publish(id, EventState::NotPublished)
    }

    /// Run the claim-and-publish sequence for a record observed in `from` state.
    pub fn retry_event(
        &self,
        id: EventId,
        from: EventState,
    ) -> Result<PublishOutcome, PersistenceError> {
        self.claim_and_publish(id, from)
    }

    fn claim_and_publish(
        &self,
        id: EventId,
        from: EventState,
    ) -> Result<PublishOutcome, PersistenceError> {
        match self.store.mark_state(id, from, EventState::InProgress) {
            Ok(()) => {}
            Err(StoreError::Conflict(conflict)) => {
                debug!(event_id = %id, actual = %conflict.actual, "Event already claimed");
                return Ok(PublishOutcome::Skipped {
                    actual: conflict.actual,
                });
            }
            // Only reported once the stored state equals `from`.
            Err(StoreError::InvalidTransition { from: actual, .. }) => {
                debug!(event_id = %id, state = %actual, "Event is not claimable");
                return Ok(PublishOutcome::Skipped { actual });
            }
            Err(StoreError::Persistence(err)) => return Err(err),
        }

        let record = self.store.get(id)?.ok_or(PersistenceError::NotFound(id))?;

        match self.publisher.send(&record.event_type, &record.payload) {
            Ok(ack) => {
                self.settle(id, self.store.mark_state(id, EventState::InProgress, EventState::Published))?;
                info!(
                    event_id = %id,
                    event_type = %record.event_type,
                    attempt = record.times_sent,
                    "Integration event published"
                );
                Ok(PublishOutcome::Published(ack))
            }
            Err(err) => {
                self.settle(id, self.store.mark_failed(id, &err.to_string()))?;
                warn!(
                    event_id = %id,
                    event_type = %record.event_type,
                    attempt = record.times_sent,
                    error = %err,
                    "Integration event publish failed"
                );
                Ok(PublishOutcome::Failed(err))
            }
        }
    }

    /// Settle the outcome of an attempt. Losing the race here means the record was
    /// reclaimed as stalled while this attempt was running.
    fn settle(&self, id: EventId, result: Result<(), StoreError>) -> Result<(), PersistenceError> {
        match result {
            Ok(()) => Ok(()),
            Err(StoreError::Persistence(err)) => Err(err),
            Err(err) => {
                debug!(event_id = %id, error = %err, "Attempt outcome superseded");
                Ok(())
            }
        }
    }
}
