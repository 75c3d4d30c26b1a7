//! Append-only, content-addressed event log and the pure folds that derive
//! report lifecycle state and grant history from it.
#![deny(missing_docs)]

/// Ledger error type.
pub mod error;
/// Pure folds over a ledger prefix: report lifecycle and grant lookups.
pub mod state;
/// File-backed, single-writer append-only event log.
pub mod storage;

pub use error::LedgerError;
pub use state::{ReportState, ReportStatus};
pub use storage::Ledger;
