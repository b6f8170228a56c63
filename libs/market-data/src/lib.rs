//! Read-mostly collaborators of the repricing engine: the item catalog, the
//! NPC vendor price list, the deduplicated sales ledger and the crowd price
//! database snapshot.

pub mod catalog;
pub mod crowd;
pub mod ledger;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;

pub use catalog::{CatalogItem, ItemCatalog};
pub use crowd::{CrowdPrice, CrowdPriceBook};
pub use ledger::SalesLedger;
