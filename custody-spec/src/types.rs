//! Shared data model: actor roles, the envelope AAD schema, and the
//! envelope itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared role of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Patient: owns reports, grants and revokes delegated access.
    #[serde(rename = "PAT")]
    Patient,
    /// Laboratory: emits, revokes, and updates reports.
    #[serde(rename = "LAB")]
    Lab,
    /// Hospital: a delegated reader.
    #[serde(rename = "HOSP")]
    Hospital,
    /// Individual doctor: a delegated reader.
    #[serde(rename = "DOC")]
    Doctor,
}

impl Role {
    /// Parse a role tag, defaulting to [`Role::Patient`] for anything
    /// unrecognized, mirroring the permissive normalization in the source
    /// registration routine.
    pub fn normalize(tag: &str) -> Role {
        match tag.to_ascii_uppercase().as_str() {
            "LAB" => Role::Lab,
            "HOSP" => Role::Hospital,
            "DOC" => Role::Doctor,
            _ => Role::Patient,
        }
    }
}

/// Fixed algorithm tag carried by every envelope.
pub const ENVELOPE_ALG: &str = "AES-256-GCM+RSA-OAEP";

/// Associated Authenticated Data bound into the envelope's AEAD computation.
///
/// All values are strings; required fields are always present, optional
/// fields are omitted from serialization (and therefore from the canonical
/// bytes) when absent, so the canonical AAD a verifier recomputes matches
/// exactly what the producer signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aad {
    /// The report id this envelope is stored under.
    #[serde(rename = "reportId")]
    pub report_id: String,
    /// The emitting lab's actor id.
    #[serde(rename = "labId")]
    pub lab_id: String,
    /// The owning patient's actor id.
    #[serde(rename = "patientRef")]
    pub patient_ref: String,
    /// RFC 3339 UTC issuance timestamp.
    #[serde(rename = "issuedAt")]
    pub issued_at: String,
    /// Optional free-text exam type.
    #[serde(rename = "examType", skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,
    /// Optional short result summary.
    #[serde(rename = "resultShort", skip_serializing_if = "Option::is_none")]
    pub result_short: Option<String>,
    /// Optional free-text note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Aad {
    /// Extra AAD fields keyed by their canonical JSON field name, in the
    /// shape the `emit` operation's `aadExtras` input takes.
    pub fn with_extras(
        report_id: impl Into<String>,
        lab_id: impl Into<String>,
        patient_ref: impl Into<String>,
        issued_at: impl Into<String>,
        extras: BTreeMap<String, String>,
    ) -> Self {
        Aad {
            report_id: report_id.into(),
            lab_id: lab_id.into(),
            patient_ref: patient_ref.into(),
            issued_at: issued_at.into(),
            exam_type: extras.get("examType").cloned(),
            result_short: extras.get("resultShort").cloned(),
            note: extras.get("note").cloned(),
        }
    }
}

/// Immutable per-report hybrid envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Fixed tag identifying the algorithm combination.
    pub alg: String,
    /// Associated authenticated data, bound into the AEAD tag and the lab signature.
    pub aad: Aad,
    /// Base64 12-byte AES-GCM nonce.
    pub nonce: String,
    /// Base64 AES-GCM ciphertext of the report plaintext.
    pub ciphertext: String,
    /// Map of recipient actor id to their Base64 RSA-OAEP-wrapped content key.
    #[serde(rename = "ek_for")]
    pub ek_for: BTreeMap<String, String>,
    /// Base64 detached RSA-PSS-SHA-256 signature over
    /// `SHA-256(ciphertext) ∥ canonical_json(aad)`, set once the lab signs.
    #[serde(rename = "sig_lab", skip_serializing_if = "Option::is_none")]
    pub sig_lab: Option<String>,
}

impl Envelope {
    /// Raw ciphertext bytes, decoded from Base64.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        use base64::engine::general_purpose::STANDARD as B64;
        use base64::Engine;
        B64.decode(&self.ciphertext)
    }
}
