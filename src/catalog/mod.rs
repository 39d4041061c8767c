//! The catalog mutation path that feeds the outbox.

mod item;
mod service;

pub use item::CatalogItem;
pub use service::{CatalogError, CatalogService, UpdateOutcome};
