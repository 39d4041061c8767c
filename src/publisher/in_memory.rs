//! In-process transport for tests and single-process deployments.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{Ack, Publisher, TransportError};

/// A message as delivered to the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportMessage {
    pub sequence: u64,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub delivered_at: DateTime<Utc>,
}

impl TransportMessage {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Default)]
struct Inner {
    log: Vec<TransportMessage>,
    position: usize,
    offline: bool,
}

/// Append-only in-memory message log.
///
/// Cloning yields another handle to the same log. `set_offline(true)` makes every
/// `send` fail with [`TransportError::ConnectionFailed`].
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Every message delivered so far, in delivery order.
    pub fn messages(&self) -> Vec<TransportMessage> {
        self.lock().log.clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .map(|m| m.event_type.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().log.is_empty()
    }

    /// Next message after the read position, if any.
    pub fn poll(&self) -> Option<TransportMessage> {
        let mut inner = self.lock();
        let message = inner.log.get(inner.position).cloned();
        if message.is_some() {
            inner.position += 1;
        }
        message
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the log itself consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Publisher for InMemoryTransport {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(TransportError::ConnectionFailed(
                "in-memory transport is offline".to_string(),
            ));
        }
        let sequence = inner.log.len() as u64 + 1;
        inner.log.push(TransportMessage {
            sequence,
            event_type: event_type.to_string(),
            payload: payload.to_vec(),
            delivered_at: Utc::now(),
        });
        Ok(Ack::with_receipt(sequence.to_string()))
    }
}
