//! Marketplace repricing bot - main library
//!
//! The workspace libraries carry the actual behavior; this crate re-exports
//! them and holds the small amount of glue the binaries need.
//!
//! - **types**: shared domain types and price rounding
//! - **bot-config**: YAML configuration plus `.env` credentials
//! - **market-client**: authenticated marketplace HTTP client
//! - **market-data**: item catalog, sales ledger, crowd price book
//! - **repricer**: checkup selection, price resolution, decay, publishing

pub use bot_config;
pub use market_client;
pub use market_data;
pub use repricer;
pub use types;

pub mod bin_common {
    //! Shared initialization for binary entry points.

    pub mod logging;

    pub use logging::init_tracing;
}
