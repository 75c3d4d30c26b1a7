//! Error types for the primitive layer.

/// Failures from canonical serialization, key I/O, or the raw crypto primitives.
///
/// These sit below the access-resolver's denial taxonomy (`custody_resolver::ResolveDenial`);
/// callers there map the relevant variants onto typed denials rather than
/// exposing this enum directly to untrusted requesters.
#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    /// A value could not be serialized to canonical JSON.
    #[error("canonical serialization failed: {0}")]
    Canonicalize(#[from] serde_json::Error),
    /// Base64 decoding failed.
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    /// PEM or DER key encoding/decoding failed.
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),
    /// RSA key generation, signing, or padding setup failed.
    #[error("rsa operation failed: {0}")]
    Rsa(#[from] rsa::Error),
    /// RSA-OAEP key unwrap failed (bad ciphertext, wrong key, or truncated key material).
    #[error("key unwrap failed")]
    UnwrapFailed,
    /// AES-256-GCM authentication or decryption failed.
    #[error("aead authentication failed")]
    AeadFailure,
    /// Input was structurally invalid (wrong length, missing field, non-UTF-8).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A key file on disk could not be read or written.
    #[error("key file io error: {0}")]
    Io(#[from] std::io::Error),
}
