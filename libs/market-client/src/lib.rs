//! Authenticated HTTP client for the marketplace.
//!
//! The marketplace has no API for what we need, so listings come from the
//! seller back-office page and, when that sample is too thin, from a full
//! marketplace search. Session refresh is serialized behind a mutex so
//! concurrent callers never race a double login.

pub mod listings;
pub mod session;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Session credentials missing from login response")]
    MissingCredentials,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Listings response for item {0} had no rows and no 'no sellers' marker")]
    EmptyResponse(u32),
}

pub type Result<T> = std::result::Result<T, ClientError>;

pub use session::{ClientConfig, MarketClient};
