//! Canonical serialization, RSA/AES-GCM primitives, and the shared data
//! model for the report custody layer: actor roles, the envelope AAD
//! schema, the envelope itself, and the four ledger event variants.
#![deny(missing_docs)]

/// Canonical JSON serialization: the byte-stable substrate for hashing and signing.
pub mod canonical;
/// Primitive-layer error type.
pub mod error;
/// The four tagged ledger event variants and the content-addressed envelope around them.
pub mod events;
/// On-disk per-actor RSA key file layout.
pub mod keystore;
/// Base64, SHA-256, RSA, and AES-256-GCM primitives.
pub mod primitives;
/// Shared data model: actor roles, AAD schema, and the envelope.
pub mod types;

pub use canonical::{canonical_json_bytes, canonical_json_string, canonical_value_bytes};
pub use error::PrimitiveError;
pub use events::{EventBody, LedgerEvent};
pub use keystore::ActorKeyStore;
pub use types::{Aad, Envelope, Role, ENVELOPE_ALG};
