//! Delivery of outbox payloads to a message transport.
//!
//! The transport protocol is opaque here. A [`Publisher`] either acknowledges a message
//! or reports a [`TransportError`]; it never hangs (wrap slow transports in
//! [`TimeoutPublisher`]). Delivery is at-least-once, so consumers must tolerate duplicates.

mod in_memory;
mod log;
mod timeout;

#[cfg(feature = "emitter")]
mod emitter;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use in_memory::{InMemoryTransport, TransportMessage};
pub use log::LogPublisher;
pub use timeout::TimeoutPublisher;

#[cfg(feature = "emitter")]
pub use emitter::LocalEmitterPublisher;

/// Transport acknowledgment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    /// Broker-assigned message reference, when the transport returns one.
    pub receipt: Option<String>,
}

impl Ack {
    pub fn with_receipt(receipt: impl Into<String>) -> Self {
        Ack {
            receipt: Some(receipt.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Other(String),
}

/// Sends one integration event to the message transport.
///
/// Implementations might include:
/// - [`InMemoryTransport`] - for tests and single-process deployments
/// - [`LogPublisher`] - writes events to the log
/// - a Kafka, NATS or RabbitMQ client
pub trait Publisher: Send + Sync {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        (**self).send(event_type, payload)
    }
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        (**self).send(event_type, payload)
    }
}
