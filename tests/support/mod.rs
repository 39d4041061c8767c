//! Shared fixtures for the outbox integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use catalog_outbox::{
    Ack, EventId, InMemoryDatabase, IntegrationEventLogService, ProductPriceChanged, Publisher,
    TransportError,
};

/// Fails the first `failures` sends, then delivers. Every call is counted.
#[derive(Default)]
pub struct FlakyPublisher {
    failures: AtomicUsize,
    calls: AtomicUsize,
    delivered: Mutex<Vec<(String, Vec<u8>)>>,
    delay: Option<Duration>,
}

impl FlakyPublisher {
    pub fn new(failures: usize) -> Self {
        FlakyPublisher {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    pub fn reliable() -> Self {
        Self::new(0)
    }

    /// Sleep inside every send, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<(String, Vec<u8>)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl Publisher for FlakyPublisher {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::ConnectionFailed("broker unreachable".to_string()));
        }

        self.delivered
            .lock()
            .unwrap()
            .push((event_type.to_string(), payload.to_vec()));
        Ok(Ack::default())
    }
}

pub type Service = IntegrationEventLogService<InMemoryDatabase, Arc<FlakyPublisher>>;

pub fn service(publisher: FlakyPublisher) -> (Arc<Service>, InMemoryDatabase, Arc<FlakyPublisher>) {
    catalog_outbox::telemetry::init_for_tests();
    let db = InMemoryDatabase::new();
    let publisher = Arc::new(publisher);
    let service = Arc::new(IntegrationEventLogService::new(db.clone(), publisher.clone()));
    (service, db, publisher)
}

/// Save one price change in its own committed transaction.
pub fn commit_price_change(service: &Service, db: &InMemoryDatabase, product_id: u64) -> EventId {
    let mut tx = db.begin().unwrap();
    let id = service
        .save_event(&mut tx, &ProductPriceChanged::new(product_id, 1500, 1200))
        .unwrap();
    tx.commit().unwrap();
    id
}
