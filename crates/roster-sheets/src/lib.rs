//! Google Sheets transport for the voice channel roster.
//!
//! [`SheetsClient`] implements [`roster_engine::SheetTransport`] over the
//! Sheets v4 values API, authenticating either with a service account key
//! or a fixed bearer token.

pub mod auth;
pub mod client;
mod error;

pub use auth::{AccessToken, SHEETS_SCOPE, ServiceAccountKey};
pub use client::{Credentials, DEFAULT_SHEETS_URL, SheetsClient};
pub use error::SheetsError;
