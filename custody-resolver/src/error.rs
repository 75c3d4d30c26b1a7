//! The typed denial taxonomy the access resolver returns.

use custody_ledger::ReportStatus;

/// Which ledger-binding check failed in step 6 of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// `pub_ev.hash` did not match `hex(SHA-256(ciphertext_bytes))`.
    Hash,
    /// `pub_ev.labId` did not match `env.aad.labId`.
    LabId,
    /// `pub_ev.patientRef` did not match `env.aad.patientRef`.
    PatientRef,
}

/// Every way the access resolver, or the mutating operations built on it,
/// can refuse a request.
///
/// Per the error handling policy: `InputInvalid`, `ReportState`, and
/// `LedgerMismatch` are safe to expose verbatim because they aid operators
/// and cannot be turned into an oracle; `UnwrapFailed` and `AeadFailure` are
/// cryptographic failures that an untrusted-facing layer should coalesce —
/// see [`ResolveDenial::redact_crypto_failure`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveDenial {
    /// Missing required field, malformed Base64, non-UTF-8 where expected.
    #[error("invalid input: {0}")]
    InputInvalid(String),
    /// Envelope or ledger event referenced but absent.
    #[error("not found")]
    NotFound,
    /// Operation illegal in the report's current lifecycle state.
    #[error("report state: {0:?}")]
    ReportState(ReportStatus),
    /// `unshare` attempted by someone other than the owning patient.
    #[error("not owner")]
    NotOwner,
    /// The envelope's lab is on the CA's CRL.
    #[error("lab revoked by ca")]
    LabRevokedByCA,
    /// The lab's detached signature over the ciphertext+AAD binding did not verify.
    #[error("invalid lab signature")]
    InvalidLabSignature,
    /// The envelope's AAD/ciphertext hash does not match the ledger PUBLISH event.
    #[error("ledger mismatch: {0:?}")]
    LedgerMismatch(MismatchReason),
    /// The envelope's AAD was structurally invalid (empty lab id or patient ref).
    #[error("invalid envelope")]
    InvalidEnvelope,
    /// No PUBLISH_REPORT event exists for the current report id.
    #[error("ledger missing")]
    LedgerMissing,
    /// The requester has no direct wrap and no GRANT.
    #[error("no grant")]
    NoGrant,
    /// The most recent GRANT's patient signature did not verify.
    #[error("invalid grant signature")]
    InvalidGrantSignature,
    /// The requester is in the report's soft-revocation set.
    #[error("soft revoked")]
    SoftRevoked,
    /// RSA-OAEP unwrap of the content key failed.
    #[error("key unwrap failed")]
    UnwrapFailed,
    /// AES-256-GCM authentication failed.
    #[error("aead authentication failed")]
    AeadFailure,
}

impl ResolveDenial {
    /// Collapse the two cryptographic-failure variants into a single
    /// `UnwrapFailed` so an untrusted-facing API cannot distinguish "bad
    /// wrap" from "bad ciphertext" and build an oracle out of it. Every
    /// other variant passes through unchanged, since the policy marks them
    /// safe to expose verbatim.
    pub fn redact_crypto_failure(self) -> ResolveDenial {
        match self {
            ResolveDenial::AeadFailure => ResolveDenial::UnwrapFailed,
            other => other,
        }
    }
}
