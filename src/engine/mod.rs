// In-memory trading core: record types and the per-broker catalog
pub mod catalog;
pub mod types;

pub use catalog::StockCatalog;
pub use types::*;
