use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::OutboxConfig;
use crate::error::{PersistenceError, StoreError};
use crate::event::IntegrationEventRecord;
use crate::publisher::Publisher;
use crate::service::{IntegrationEventLogService, PublishOutcome};
use crate::store::OutboxStore;

const STALLED_ERROR: &str = "publish attempt stalled";

/// Counts from one or more sweeps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    /// Records this sweeper moved into `InProgress`.
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
    /// Records another actor claimed first.
    pub skipped: usize,
    /// Records left alone because they reached `max_attempts`.
    pub abandoned: usize,
    /// Stalled `InProgress` records moved back to `PublishFailed`.
    pub released: usize,
}

impl SweepResult {
    pub fn did_work(&self) -> bool {
        self.claimed > 0 || self.released > 0
    }

    pub fn merge(&mut self, other: &SweepResult) {
        self.claimed += other.claimed;
        self.published += other.published;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.abandoned += other.abandoned;
        self.released += other.released;
    }
}

/// Periodic safety net that drives committed records to `Published`.
///
/// Claims go through the same conditional update as
/// [`IntegrationEventLogService::publish_event`], so a record already claimed by the
/// request path is skipped rather than delivered twice.
pub struct RecoverySweeper<S, P> {
    service: Arc<IntegrationEventLogService<S, P>>,
    batch_size: usize,
    grace_period: Duration,
    stall_timeout: Duration,
    max_attempts: Option<u32>,
}

impl<S, P> RecoverySweeper<S, P> {
    /// Create a sweeper with the default configuration.
    pub fn new(service: Arc<IntegrationEventLogService<S, P>>) -> Self {
        Self::from_config(service, &OutboxConfig::default())
    }

    /// Create a sweeper from batch size, grace period, stall timeout and retry limit in `config`.
    pub fn from_config(service: Arc<IntegrationEventLogService<S, P>>, config: &OutboxConfig) -> Self {
        Self {
            service,
            batch_size: config.batch_size,
            grace_period: config.grace_period,
            stall_timeout: config.stall_timeout,
            max_attempts: config.max_attempts,
        }
    }

    /// Set the batch size (max records to retry per sweep).
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the minimum age of a pending record before it is retried.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the age at which an `InProgress` claim is released.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the maximum number of sends before a record is abandoned (`None` = unbounded).
    pub fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn service(&self) -> &Arc<IntegrationEventLogService<S, P>> {
        &self.service
    }
}

impl<S: OutboxStore, P: Publisher> RecoverySweeper<S, P> {
    /// Release stalled attempts, then claim and publish one batch of pending records.
    pub fn sweep_once(&self) -> Result<SweepResult, PersistenceError> {
        let mut result = SweepResult::default();

        self.release_stalled(cutoff(Utc::now(), self.stall_timeout), &mut result)?;

        let batch = self.select_batch(cutoff(Utc::now(), self.grace_period), &mut result)?;
        for record in batch {
            match self.service.retry_event(record.id, record.state)? {
                PublishOutcome::Published(_) => {
                    result.claimed += 1;
                    result.published += 1;
                }
                PublishOutcome::Failed(_) => {
                    result.claimed += 1;
                    result.failed += 1;
                }
                PublishOutcome::Skipped { .. } => result.skipped += 1,
            }
        }

        if result.did_work() {
            debug!(?result, "Recovery sweep finished");
        }
        Ok(result)
    }

    fn release_stalled(
        &self,
        older_than: DateTime<Utc>,
        result: &mut SweepResult,
    ) -> Result<(), PersistenceError> {
        let store = self.service.store();
        for record in store.list_stalled(self.batch_size, older_than)? {
            match store.mark_failed(record.id, STALLED_ERROR) {
                Ok(()) => {
                    warn!(event_id = %record.id, attempt = record.times_sent, "Released stalled publish attempt");
                    result.released += 1;
                }
                Err(StoreError::Persistence(err)) => return Err(err),
                Err(err) => debug!(event_id = %record.id, error = %err, "Stalled attempt finished meanwhile"),
            }
        }
        Ok(())
    }

    /// Up to `batch_size` retryable records. Abandoned records are counted and widen the
    /// query so they cannot starve newer ones.
    fn select_batch(
        &self,
        older_than: DateTime<Utc>,
        result: &mut SweepResult,
    ) -> Result<Vec<IntegrationEventRecord>, PersistenceError> {
        let store = self.service.store();
        let mut limit = self.batch_size;
        loop {
            let records = store.list_pending(limit, older_than)?;
            let exhausted = records.len() < limit;
            let (abandoned, retryable): (Vec<_>, Vec<_>) = records
                .into_iter()
                .partition(|record| self.is_abandoned(record));

            if exhausted || retryable.len() >= self.batch_size {
                for record in &abandoned {
                    debug!(event_id = %record.id, attempts = record.times_sent, "Skipping abandoned event");
                }
                result.abandoned += abandoned.len();
                return Ok(retryable.into_iter().take(self.batch_size).collect());
            }
            limit = self.batch_size + abandoned.len();
        }
    }

    fn is_abandoned(&self, record: &IntegrationEventRecord) -> bool {
        self.max_attempts
            .is_some_and(|max| record.times_sent >= max)
    }
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventId, EventState, ProductPriceChanged};
    use crate::publisher::InMemoryTransport;
    use crate::store::InMemoryDatabase;

    type Service = IntegrationEventLogService<InMemoryDatabase, InMemoryTransport>;

    fn setup() -> (Arc<Service>, InMemoryDatabase, InMemoryTransport) {
        let db = InMemoryDatabase::new();
        let transport = InMemoryTransport::new();
        let service = Arc::new(IntegrationEventLogService::new(db.clone(), transport.clone()));
        (service, db, transport)
    }

    fn saved(service: &Service, db: &InMemoryDatabase, product_id: u64) -> EventId {
        let mut tx = db.begin().unwrap();
        let id = service
            .save_event(&mut tx, &ProductPriceChanged::new(product_id, 20, 10))
            .unwrap();
        tx.commit().unwrap();
        id
    }

    #[test]
    fn sweeper_builder() {
        let (service, _, _) = setup();
        let sweeper = RecoverySweeper::new(service)
            .with_batch_size(5)
            .with_grace_period(Duration::from_secs(30))
            .with_stall_timeout(Duration::from_secs(90))
            .with_max_attempts(Some(4));

        assert_eq!(sweeper.batch_size, 5);
        assert_eq!(sweeper.grace_period, Duration::from_secs(30));
        assert_eq!(sweeper.stall_timeout, Duration::from_secs(90));
        assert_eq!(sweeper.max_attempts, Some(4));
    }

    #[test]
    fn grace_period_protects_fresh_records() {
        let (service, db, transport) = setup();
        saved(&service, &db, 1);

        let sweeper = RecoverySweeper::new(service).with_grace_period(Duration::from_secs(3600));
        let result = sweeper.sweep_once().unwrap();

        assert_eq!(result, SweepResult::default());
        assert!(transport.is_empty());
    }

    #[test]
    fn sweep_publishes_pending_in_id_order() {
        let (service, db, transport) = setup();
        let first = saved(&service, &db, 1);
        let second = saved(&service, &db, 2);

        let sweeper = RecoverySweeper::new(service).with_grace_period(Duration::ZERO);
        let result = sweeper.sweep_once().unwrap();

        assert_eq!(result.claimed, 2);
        assert_eq!(result.published, 2);
        let products: Vec<u64> = transport
            .messages()
            .iter()
            .map(|m| m.decode::<ProductPriceChanged>().unwrap().product_id)
            .collect();
        assert_eq!(products, vec![1, 2]);
        assert_eq!(db.get(first).unwrap().unwrap().state, EventState::Published);
        assert_eq!(db.get(second).unwrap().unwrap().state, EventState::Published);
    }

    #[test]
    fn batch_size_limits_one_sweep() {
        let (service, db, transport) = setup();
        for product in 0..5 {
            saved(&service, &db, product);
        }

        let sweeper = RecoverySweeper::new(service)
            .with_grace_period(Duration::ZERO)
            .with_batch_size(2);

        assert_eq!(sweeper.sweep_once().unwrap().published, 2);
        assert_eq!(transport.len(), 2);
        assert_eq!(sweeper.sweep_once().unwrap().published, 2);
        assert_eq!(sweeper.sweep_once().unwrap().published, 1);
        assert_eq!(sweeper.sweep_once().unwrap(), SweepResult::default());
    }

    #[test]
    fn stalled_record_is_released_then_retried() {
        let (service, db, transport) = setup();
        let id = saved(&service, &db, 1);
        // A crashed attempt: claimed, never settled.
        db.mark_state(id, EventState::NotPublished, EventState::InProgress)
            .unwrap();

        let sweeper = RecoverySweeper::new(service)
            .with_grace_period(Duration::ZERO)
            .with_stall_timeout(Duration::ZERO);

        let result = sweeper.sweep_once().unwrap();
        assert_eq!(result.released, 1);
        assert_eq!(result.published, 1);

        let record = db.get(id).unwrap().unwrap();
        assert_eq!(record.state, EventState::Published);
        assert_eq!(record.times_sent, 2);
        assert_eq!(transport.len(), 1);
    }

    #[test]
    fn in_progress_within_stall_timeout_is_left_alone() {
        let (service, db, transport) = setup();
        let id = saved(&service, &db, 1);
        db.mark_state(id, EventState::NotPublished, EventState::InProgress)
            .unwrap();

        let sweeper = RecoverySweeper::new(service)
            .with_grace_period(Duration::ZERO)
            .with_stall_timeout(Duration::from_secs(3600));

        assert_eq!(sweeper.sweep_once().unwrap(), SweepResult::default());
        assert_eq!(db.get(id).unwrap().unwrap().state, EventState::InProgress);
        assert!(transport.is_empty());
    }

    #[test]
    fn abandoned_records_do_not_starve_the_batch() {
        let (service, db, transport) = setup();
        let stuck = saved(&service, &db, 1);
        transport.set_offline(true);
        service.publish_event(stuck).unwrap();
        transport.set_offline(false);
        let fresh = saved(&service, &db, 2);

        let sweeper = RecoverySweeper::new(service)
            .with_grace_period(Duration::ZERO)
            .with_batch_size(1)
            .with_max_attempts(Some(1));

        let result = sweeper.sweep_once().unwrap();
        assert_eq!(result.abandoned, 1);
        assert_eq!(result.published, 1);
        assert_eq!(db.get(stuck).unwrap().unwrap().state, EventState::PublishFailed);
        assert_eq!(db.get(fresh).unwrap().unwrap().state, EventState::Published);
    }

    #[test]
    fn unavailable_store_is_reported() {
        let (service, db, _) = setup();
        db.shutdown();
        let sweeper = RecoverySweeper::new(service);
        assert_eq!(sweeper.sweep_once().unwrap_err(), PersistenceError::Unavailable);
    }
}
