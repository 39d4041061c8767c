use serde::{Deserialize, Serialize};

/// A product in the catalog. Prices are in minor currency units (e.g. cents).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub price: u64,
    pub catalog_type_id: u32,
    pub catalog_brand_id: u32,
    pub available_stock: u32,
}

impl CatalogItem {
    pub fn new(id: u64, name: impl Into<String>, price: u64) -> Self {
        CatalogItem {
            id,
            name: name.into(),
            description: String::new(),
            price,
            catalog_type_id: 0,
            catalog_brand_id: 0,
            available_stock: 0,
        }
    }

    pub fn with_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }
}
