mod integration_event;
mod record;

pub use integration_event::{IntegrationEvent, ProductPriceChanged};
pub use record::{EventId, EventState, IntegrationEventRecord};
