use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{Ack, Publisher, TransportError};

/// A publisher that writes events to the log, optionally capturing them in a buffer.
#[derive(Default)]
pub struct LogPublisher {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogPublisher {
    pub fn new() -> Self {
        LogPublisher { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogPublisher {
            buffer: Some(buffer),
        }
    }
}

/// UTF-8 payloads are logged as text, anything else as base64.
fn render_payload(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("base64:{}", STANDARD.encode(payload)),
    }
}

impl Publisher for LogPublisher {
    fn send(&self, event_type: &str, payload: &[u8]) -> Result<Ack, TransportError> {
        let rendered = render_payload(payload);
        tracing::info!(event_type = %event_type, payload = %rendered, "Integration event published");

        if let Some(buffer) = &self.buffer {
            let mut buffer = buffer
                .lock()
                .map_err(|_| TransportError::Other("log publisher buffer poisoned".to_string()))?;
            buffer.push(format!("[OUTBOX] {} {}", event_type, rendered));
        }
        Ok(Ack::default())
    }
}
