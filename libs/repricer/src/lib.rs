//! The repricing engine.
//!
//! Three tightly coupled pieces do all the interesting work: the checkup
//! selector decides which items are stale enough to re-verify this run, the
//! market price resolver reconciles the disagreeing price sources into one
//! canonical real price per item, and the decay adjuster walks each public
//! price toward its real price a bounded step at a time. [`run`] wires them
//! together once per invocation.

pub mod checkup;
pub mod decay;
pub mod publish;
pub mod resolver;
pub mod run;
pub mod store;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Market client error: {0}")]
    Client(#[from] market_client::ClientError),

    #[error("Market data error: {0}")]
    Data(#[from] market_data::DataError),

    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub use checkup::{CheckupSelector, Selection};
pub use decay::advance;
pub use resolver::{ListingsProvider, MarketPriceResolver};
pub use run::RepricingRun;
pub use store::RecordStore;
