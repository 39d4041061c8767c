use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::IntegrationEventRecord;
use crate::error::PersistenceError;
use crate::store::TransactionId;

/// A notification other services subscribe to.
///
/// The payload written to the outbox is the JSON form of the implementing type.
pub trait IntegrationEvent: Serialize {
    /// Discriminator stored in `IntegrationEventRecord::event_type`.
    const EVENT_TYPE: &'static str;

    /// Identity of this event instance, stable across retried appends.
    fn event_id(&self) -> Uuid;

    fn to_record(&self, transaction_id: TransactionId) -> Result<IntegrationEventRecord, PersistenceError> {
        let payload = serde_json::to_vec(self).map_err(|e| PersistenceError::Serialization {
            what: Self::EVENT_TYPE,
            details: e.to_string(),
        })?;
        Ok(IntegrationEventRecord::new(
            self.event_id(),
            Self::EVENT_TYPE,
            payload,
            transaction_id,
        ))
    }
}

/// Raised when a catalog item's price is changed.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ProductPriceChanged {
    pub id: Uuid,
    pub creation_date: DateTime<Utc>,
    pub product_id: u64,
    pub new_price: u64,
    pub old_price: u64,
}

impl ProductPriceChanged {
    pub fn new(product_id: u64, new_price: u64, old_price: u64) -> Self {
        ProductPriceChanged {
            id: Uuid::now_v7(),
            creation_date: Utc::now(),
            product_id,
            new_price,
            old_price,
        }
    }
}

impl IntegrationEvent for ProductPriceChanged {
    const EVENT_TYPE: &'static str = "price-changed";

    fn event_id(&self) -> Uuid {
        self.id
    }
}
