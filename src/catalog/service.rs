use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::CatalogItem;
use crate::error::PersistenceError;
use crate::event::{EventId, ProductPriceChanged};
use crate::publisher::Publisher;
use crate::service::{IntegrationEventLogService, PublishOutcome};
use crate::store::{InMemoryDatabase, Versioned};

const ITEMS: &str = "catalog_items";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("catalog item {0} not found")]
    NotFound(u64),
    #[error("catalog item {0} already exists")]
    AlreadyExists(u64),
    /// Another update committed between this one's read and its commit.
    #[error("catalog item {0} was modified concurrently")]
    Modified(u64),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// What `update_product` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub price_changed: bool,
    /// Outbox record written with the update, if the price changed.
    pub event: Option<EventId>,
    /// Result of the immediate publish attempt. `None` when nothing was published or the
    /// attempt hit a storage error; the sweeper covers both.
    pub publish: Option<PublishOutcome>,
}

/// Product mutations that notify other services through the outbox.
pub struct CatalogService<P> {
    db: InMemoryDatabase,
    events: Arc<IntegrationEventLogService<InMemoryDatabase, P>>,
}

impl<P: Publisher> CatalogService<P> {
    pub fn new(db: InMemoryDatabase, events: Arc<IntegrationEventLogService<InMemoryDatabase, P>>) -> Self {
        CatalogService { db, events }
    }

    pub fn get_product(&self, id: u64) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(self.db.get_document(ITEMS, &id.to_string())?)
    }

    pub fn create_product(&self, item: &CatalogItem) -> Result<(), CatalogError> {
        let mut tx = self.db.begin()?;
        tx.put_expecting(ITEMS, item.id.to_string(), item, 0)?;
        tx.commit().map_err(|err| match err {
            PersistenceError::ConcurrentWrite { .. } => CatalogError::AlreadyExists(item.id),
            err => err.into(),
        })
    }

    /// Replace a product. A price change is saved to the outbox in the same transaction
    /// and published right after commit.
    ///
    /// The write only commits if the product is unchanged since it was read, so the event's
    /// `old_price` is always the price being replaced. A lost race is
    /// [`CatalogError::Modified`] and nothing is written.
    ///
    /// Once the transaction commits this returns `Ok`, whatever happens to delivery.
    pub fn update_product(&self, item: &CatalogItem) -> Result<UpdateOutcome, CatalogError> {
        let current = self
            .db
            .get_versioned::<CatalogItem>(ITEMS, &item.id.to_string())?
            .ok_or(CatalogError::NotFound(item.id))?;
        self.apply_update(current, item)
    }

    fn apply_update(
        &self,
        Versioned {
            data: current,
            version,
        }: Versioned<CatalogItem>,
        item: &CatalogItem,
    ) -> Result<UpdateOutcome, CatalogError> {
        let price_changed = current.price != item.price;
        let commit_error = |err: PersistenceError| match err {
            PersistenceError::ConcurrentWrite { .. } => CatalogError::Modified(item.id),
            err => err.into(),
        };

        let mut tx = self.db.begin()?;
        tx.put_expecting(ITEMS, item.id.to_string(), item, version)?;

        if !price_changed {
            tx.commit().map_err(commit_error)?;
            return Ok(UpdateOutcome {
                price_changed,
                event: None,
                publish: None,
            });
        }

        let event = ProductPriceChanged::new(item.id, item.price, current.price);
        let event_id = self.events.save_event(&mut tx, &event)?;
        tx.commit().map_err(commit_error)?;
        debug!(product_id = item.id, event_id = %event_id, "Price change committed");

        let publish = match self.events.publish_event(event_id) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(event_id = %event_id, error = %err, "Could not record publish attempt");
                None
            }
        };

        Ok(UpdateOutcome {
            price_changed,
            event: Some(event_id),
            publish,
        })
    }
}
