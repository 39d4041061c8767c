use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{Ack, Publisher, TransportError};

/// Bounds every `send` of the wrapped publisher.
///
/// The inner call runs on a helper thread. When the deadline passes the caller gets
/// [`TransportError::Timeout`]; the inner call is left to finish on its own, so the
/// message may still reach the transport.
pub struct TimeoutPublisher<P> {
    inner: Arc<P>,
    timeout: Duration,
}

impl<P> TimeoutPublisher<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        TimeoutPublisher {
            inner: Arc::new(inner),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: Publisher + 'static> Publisher for TimeoutPublisher<P> {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let event_type_owned = event_type.to_string();
        let payload = payload.to_vec();

        thread::Builder::new()
            .name("outbox-publish".to_string())
            .spawn(move || {
                let _ = tx.send(inner.send(&event_type_owned, &payload));
            })
            .map_err(|e| TransportError::Other(format!("failed to spawn publish thread: {e}")))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(event_type = %event_type, timeout = ?self.timeout, "Publish timed out");
                Err(TransportError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TransportError::Other(
                "publish thread exited without a result".to_string(),
            )),
        }
    }
}
