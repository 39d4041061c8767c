//! Transactional outbox for catalog integration events.
//!
//! Business writes and the events they produce are committed in one transaction, then
//! published after commit. Records whose publication failed or never completed are
//! picked up again by the [`RecoverySweeper`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod publisher;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod telemetry;

pub use catalog::{CatalogError, CatalogItem, CatalogService, UpdateOutcome};
pub use config::{ConfigError, OutboxConfig};
pub use error::{ConflictError, PersistenceError, StoreError};
pub use event::{EventId, EventState, IntegrationEvent, IntegrationEventRecord, ProductPriceChanged};
pub use publisher::{Ack, InMemoryTransport, LogPublisher, Publisher, TimeoutPublisher, TransportError};
pub use service::{IntegrationEventLogService, PublishOutcome};
pub use store::{InMemoryDatabase, OutboxStore, Transaction, TransactionId, UnitOfWork, Versioned};
pub use sweeper::{RecoverySweeper, SweepResult, SweeperThread};

#[cfg(feature = "emitter")]
pub use publisher::LocalEmitterPublisher;

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
