//! The four ledger event variants and the envelope-independent append record
//! that wraps them.
//!
//! Kept as an explicit tagged union rather than the dynamic field maps of
//! the source: each variant lists exactly the payload fields the data model
//! names for it, and `serde`'s internally-tagged representation
//! (`#[serde(tag = "type")]`) reproduces the flat `{"type": "...", ...}`
//! on-disk shape byte-for-byte.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_json_bytes;
use crate::error::PrimitiveError;
use crate::primitives::hex_encode as hex_encode_bytes;
use crate::primitives::sha256_bytes;

/// The payload carried by a single ledger event, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventBody {
    /// A lab publishes a new report for a patient.
    #[serde(rename = "PUBLISH_REPORT")]
    PublishReport {
        /// Report id this event publishes.
        #[serde(rename = "reportId")]
        report_id: String,
        /// Emitting lab's actor id.
        #[serde(rename = "labId")]
        lab_id: String,
        /// Owning patient's actor id.
        #[serde(rename = "patientRef")]
        patient_ref: String,
        /// Hex SHA-256 of the envelope ciphertext at publish time.
        hash: String,
        /// Base64 lab signature, duplicated from the envelope for audit.
        sig_lab: String,
        /// RFC 3339 UTC issuance timestamp, duplicated from the AAD.
        #[serde(rename = "issuedAt")]
        issued_at: String,
    },
    /// A lab revokes a report, terminally.
    #[serde(rename = "REVOKE_REPORT")]
    RevokeReport {
        /// Report id being revoked.
        #[serde(rename = "reportId")]
        report_id: String,
        /// Revoking lab's actor id.
        #[serde(rename = "labId")]
        lab_id: String,
        /// Free-text reason, empty string if none given.
        #[serde(default)]
        reason: String,
    },
    /// A lab supersedes one report id with another.
    #[serde(rename = "UPDATE_REPORT")]
    UpdateReport {
        /// The id being superseded.
        #[serde(rename = "oldReportId")]
        old_report_id: String,
        /// The new current id.
        #[serde(rename = "newReportId")]
        new_report_id: String,
        /// Updating lab's actor id.
        #[serde(rename = "labId")]
        lab_id: String,
    },
    /// A patient delegates read access of a report to another actor.
    #[serde(rename = "GRANT")]
    Grant {
        /// Report id being shared.
        #[serde(rename = "reportId")]
        report_id: String,
        /// Granting patient's actor id.
        from: String,
        /// Recipient's actor id.
        to: String,
        /// Base64 RSA-OAEP-wrapped content key under the recipient's public key.
        ek_to: String,
        /// Base64 patient signature over `canonical_json({reportId, from, to, ek_to})`.
        sig_pat: String,
    },
}

impl EventBody {
    /// The `type` discriminant as it appears on the wire.
    pub fn type_tag(&self) -> &'static str {
        match self {
            EventBody::PublishReport { .. } => "PUBLISH_REPORT",
            EventBody::RevokeReport { .. } => "REVOKE_REPORT",
            EventBody::UpdateReport { .. } => "UPDATE_REPORT",
            EventBody::Grant { .. } => "GRANT",
        }
    }
}

/// Fields hashed to produce `txId`: every field of the final event except
/// `txId` itself.
#[derive(Serialize)]
struct UnsignedEvent<'a> {
    ts: u64,
    #[serde(rename = "prevTxId", skip_serializing_if = "Option::is_none")]
    prev_tx_id: &'a Option<String>,
    #[serde(flatten)]
    body: &'a EventBody,
}

/// A fully-formed, content-addressed ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Unix seconds at append time.
    pub ts: u64,
    /// `SHA-256(canonical_json(event without txId))`, hex-encoded.
    #[serde(rename = "txId")]
    pub tx_id: String,
    /// Hex `txId` of the line appended immediately before this one, or
    /// `None` for the first event in the log. Ignored by all state folds;
    /// consulted only by [`crate::events::verify_chain`] for integrity audits.
    #[serde(rename = "prevTxId", skip_serializing_if = "Option::is_none")]
    pub prev_tx_id: Option<String>,
    /// The typed payload.
    #[serde(flatten)]
    pub body: EventBody,
}

impl LedgerEvent {
    /// Build a new event, computing its content-addressed `txId`.
    pub fn new(
        body: EventBody,
        ts: u64,
        prev_tx_id: Option<String>,
    ) -> Result<LedgerEvent, PrimitiveError> {
        let unsigned = UnsignedEvent {
            ts,
            prev_tx_id: &prev_tx_id,
            body: &body,
        };
        let bytes = canonical_json_bytes(&unsigned)?;
        let tx_id = hex_encode_bytes(&sha256_bytes(&bytes));
        Ok(LedgerEvent {
            ts,
            tx_id,
            prev_tx_id,
            body,
        })
    }

    /// Recompute `txId` from the event's own fields and compare, for
    /// integrity audits that must hard-error on tampering.
    pub fn recompute_tx_id(&self) -> Result<String, PrimitiveError> {
        let unsigned = UnsignedEvent {
            ts: self.ts,
            prev_tx_id: &self.prev_tx_id,
            body: &self.body,
        };
        let bytes = canonical_json_bytes(&unsigned)?;
        Ok(hex_encode_bytes(&sha256_bytes(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(report_id: &str) -> EventBody {
        EventBody::PublishReport {
            report_id: report_id.into(),
            lab_id: "LAB-1".into(),
            patient_ref: "PAT-1".into(),
            hash: "deadbeef".into(),
            sig_lab: "sig".into(),
            issued_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn tx_id_is_pure_function_of_canonical_bytes() {
        let e1 = LedgerEvent::new(publish("R1"), 1000, None).unwrap();
        let e2 = LedgerEvent::new(publish("R1"), 1000, None).unwrap();
        assert_eq!(e1.tx_id, e2.tx_id);
        assert_eq!(e1.recompute_tx_id().unwrap(), e1.tx_id);
    }

    #[test]
    fn tx_id_changes_with_any_field() {
        let e1 = LedgerEvent::new(publish("R1"), 1000, None).unwrap();
        let e2 = LedgerEvent::new(publish("R1"), 1001, None).unwrap();
        assert_ne!(e1.tx_id, e2.tx_id);

        let e3 = LedgerEvent::new(publish("R1"), 1000, Some("abc".into())).unwrap();
        assert_ne!(e1.tx_id, e3.tx_id);
    }

    #[test]
    fn serializes_as_flat_tagged_object() {
        let e = LedgerEvent::new(publish("R1"), 1000, None).unwrap();
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "PUBLISH_REPORT");
        assert_eq!(v["reportId"], "R1");
        assert!(v.get("prevTxId").is_none());
    }
}
