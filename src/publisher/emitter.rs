use std::sync::Mutex;

use event_emitter_rs::EventEmitter;

use super::{Ack, Publisher, TransportError};

/// A publisher that emits events via an [`EventEmitter`] for in-process subscribers.
///
/// Listeners receive the payload as a UTF-8 string.
pub struct LocalEmitterPublisher {
    emitter: Mutex<EventEmitter>,
}

impl LocalEmitterPublisher {
    pub fn new(emitter: EventEmitter) -> Self {
        LocalEmitterPublisher {
            emitter: Mutex::new(emitter),
        }
    }
}

impl Publisher for LocalEmitterPublisher {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        let payload_str = String::from_utf8_lossy(payload).into_owned();
        let mut emitter = self
            .emitter
            .lock()
            .map_err(|_| TransportError::Other("event emitter poisoned".to_string()))?;
        let _ = emitter.emit(event_type, payload_str);
        Ok(Ack::default())
    }
}
