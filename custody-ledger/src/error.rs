//! Ledger error types.

/// Failures from the append-only log: disk I/O, content-addressing, and the
/// integrity audit.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger file could not be opened, read, written, or flushed.
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),
    /// A line's `txId` could not be recomputed (canonical serialization failed).
    #[error("canonicalization failed: {0}")]
    Primitive(#[from] custody_spec::PrimitiveError),
    /// Integrity audit: a line's stored `txId` does not match its recomputed
    /// value, or its `prevTxId` does not match the previous line's `txId`.
    #[error("ledger integrity broken at line {line_no}: {reason}")]
    ChainBroken {
        /// 1-indexed line number of the broken entry.
        line_no: usize,
        /// Human-readable description of the break.
        reason: String,
    },
}
