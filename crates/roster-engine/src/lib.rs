//! Membership reconciliation and serialized roster writes.
//!
//! This crate keeps a remote tabular roster in step with who is currently
//! in a set of monitored voice channels:
//!
//! - **Identity**: pure label resolution from optional name overrides
//! - **Membership**: the in-memory set of tracked labels
//! - **Sheet**: header/rows layout over a [`SheetTransport`]
//! - **Writer**: the single worker that serializes and coalesces writes
//! - **Reconciler**: turns presence events into store mutations and sync requests
//!
//! Transports for the remote store and the presence source live in other
//! crates and plug in through [`SheetTransport`] and [`PresenceSource`].

mod error;
pub mod identity;
pub mod membership;
pub mod presence;
pub mod reconciler;
pub mod sheet;
#[cfg(test)]
mod test_support;
pub mod writer;

pub use error::{BoxError, EngineError};
pub use identity::{MemberIdentity, MemberLabel, resolve_label};
pub use membership::MembershipStore;
pub use presence::{MemberRef, PresenceEvent, PresenceSource};
pub use reconciler::{MembershipChange, Reconciler};
pub use sheet::{DEFAULT_SHEET_NAME, HEADER_VALUE, RosterSheet, SheetTransport, dedup_labels};
pub use writer::{SyncHandle, SyncStats, SyncWriter};
