//! The access-resolution pipeline: the orchestration kernel that composes
//! the ledger, the envelope codec, and the CA/CRL registry into a single
//! decision function, plus the mutating operations (`emit`, `share`,
//! `unshare`, `revoke`, `update`) built on top of it.
#![deny(missing_docs)]

/// The typed denial taxonomy the access resolver returns.
pub mod error;
/// The metrics sink seam the core calls into.
pub mod metrics;
/// The envelope and soft-revocation key-value store.
pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use custody_envelope::{decrypt_with_key, encrypt_for_recipients, lab_binding_message};
use custody_ledger::{Ledger, ReportState};
use custody_registry::Registry;
use custody_spec::events::EventBody;
use custody_spec::primitives::{
    public_key_from_pem, sha256_hex, sign, unwrap, verify, wrap, ContentKey,
};
use custody_spec::{canonical_json_bytes, Aad, Envelope};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use zeroize::Zeroizing;

pub use error::{MismatchReason, ResolveDenial};
pub use metrics::{MetricsSink, NoopSink};
pub use store::EnvelopeStore;

/// Exact bytes a patient signs for a GRANT, per the ledger binding: the
/// canonical JSON of the four delegation fields.
#[derive(Serialize)]
struct GrantSigPayload<'a> {
    #[serde(rename = "reportId")]
    report_id: &'a str,
    from: &'a str,
    to: &'a str,
    ek_to: &'a str,
}

/// The orchestration kernel: holds handles to the ledger, the envelope/
/// soft-revocation store, the CA registry, and a metrics sink, and exposes
/// the operations surface of §6.
#[derive(Clone)]
pub struct CustodyService {
    ledger: Ledger,
    store: EnvelopeStore,
    registry: Registry,
    metrics: Arc<dyn MetricsSink>,
}

impl CustodyService {
    /// Build a service over the given stores, recording no metrics.
    pub fn new(ledger: Ledger, store: EnvelopeStore, registry: Registry) -> CustodyService {
        CustodyService {
            ledger,
            store,
            registry,
            metrics: Arc::new(NoopSink),
        }
    }

    /// Build a service that records timing and outcome counters into `metrics`.
    pub fn with_metrics(
        ledger: Ledger,
        store: EnvelopeStore,
        registry: Registry,
        metrics: Arc<dyn MetricsSink>,
    ) -> CustodyService {
        CustodyService {
            ledger,
            store,
            registry,
            metrics,
        }
    }

    /// The underlying ledger handle, for operators and the daemon's
    /// `state_of`/audit routes.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The underlying CA/CRL registry handle.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The underlying envelope/soft-revocation store handle.
    pub fn store(&self) -> &EnvelopeStore {
        &self.store
    }

    /// `state_of(reportId)`, a pure pass-through to the ledger fold.
    pub fn state_of(&self, report_id: &str) -> ReportState {
        self.ledger.state_of(report_id)
    }

    /// `emit`: the lab builds and signs a fresh envelope for `patient_ref`
    /// and publishes it. The only recipient wrapped at emission time is the
    /// patient; hospitals and doctors gain access exclusively through
    /// `share`.
    pub fn emit(
        &self,
        report_id: &str,
        lab_id: &str,
        lab_priv: &RsaPrivateKey,
        patient_ref: &str,
        patient_pub: &RsaPublicKey,
        content: &[u8],
        aad_extras: BTreeMap<String, String>,
    ) -> Result<Envelope, ResolveDenial> {
        let issued_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let aad = Aad::with_extras(report_id, lab_id, patient_ref, issued_at.clone(), aad_extras);

        let mut recipients = BTreeMap::new();
        recipients.insert(patient_ref.to_string(), patient_pub.clone());

        let mut env = encrypt_for_recipients(content, aad, &recipients)
            .map_err(|_| ResolveDenial::InputInvalid("envelope construction failed".into()))?;

        let ct_bytes = env
            .ciphertext_bytes()
            .map_err(|_| ResolveDenial::InputInvalid("ciphertext is not valid base64".into()))?;
        let msg = lab_binding_message(&ct_bytes, &env.aad)
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        let sig_lab = sign(lab_priv, &msg).map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        env.sig_lab = Some(sig_lab.clone());

        let hash_hex = sha256_hex(&ct_bytes);

        self.store
            .put_envelope(report_id, env.clone())
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        self.ledger
            .append(EventBody::PublishReport {
                report_id: report_id.to_string(),
                lab_id: lab_id.to_string(),
                patient_ref: patient_ref.to_string(),
                hash: hash_hex,
                sig_lab,
                issued_at,
            })
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;

        self.metrics.record("custody_emit_total", 1.0);
        tracing::info!(report_id, lab_id, patient_ref, "report emitted");
        Ok(env)
    }

    /// `revoke`: terminally revoke the current report id. Illegal if the
    /// current report is already revoked or the queried id is not current.
    pub fn revoke(
        &self,
        report_id: &str,
        lab_id: &str,
        reason: Option<String>,
    ) -> Result<(), ResolveDenial> {
        let st = self.state_of(report_id);
        if st.current_report_id != report_id || matches!(st.status, custody_ledger::ReportStatus::Revoked)
        {
            return Err(ResolveDenial::ReportState(st.status));
        }
        self.ledger
            .append(EventBody::RevokeReport {
                report_id: report_id.to_string(),
                lab_id: lab_id.to_string(),
                reason: reason.unwrap_or_default(),
            })
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        self.metrics.record("custody_revoke_total", 1.0);
        tracing::info!(report_id, lab_id, "report revoked");
        Ok(())
    }

    /// `update`: supersede `old_report_id` with `new_report_id`, storing the
    /// caller-supplied fresh envelope under the new id. The soft-revocation
    /// set is not carried over; see the data model's update notes.
    ///
    /// Besides the `UPDATE_REPORT` link, this also appends a fresh
    /// `PUBLISH_REPORT` for `new_report_id` bound to the new envelope's own
    /// hash/labId/patientRef. The data model's envelope invariant requires
    /// every stored envelope's id to have a matching ledger PUBLISH event,
    /// and a report reached only through an UPDATE link (with no PUBLISH of
    /// its own) would otherwise be unresolvable: both the step-1 state fold
    /// and the step-6 ledger-binding check key off `get_publish(currentReportId)`,
    /// and a requester querying the new id directly must see it as current
    /// and valid rather than `UNKNOWN`.
    pub fn update(
        &self,
        old_report_id: &str,
        new_report_id: &str,
        lab_id: &str,
        new_envelope: Envelope,
    ) -> Result<(), ResolveDenial> {
        let st = self.state_of(old_report_id);
        if st.current_report_id != old_report_id
            || matches!(st.status, custody_ledger::ReportStatus::Revoked)
        {
            return Err(ResolveDenial::ReportState(st.status));
        }
        let ct_bytes = new_envelope
            .ciphertext_bytes()
            .map_err(|_| ResolveDenial::InputInvalid("ciphertext is not valid base64".into()))?;
        let sig_lab = new_envelope
            .sig_lab
            .clone()
            .ok_or_else(|| ResolveDenial::InputInvalid("new envelope is missing sig_lab".into()))?;
        let hash_hex = sha256_hex(&ct_bytes);
        let patient_ref = new_envelope.aad.patient_ref.clone();
        let issued_at = new_envelope.aad.issued_at.clone();

        self.store
            .put_envelope(new_report_id, new_envelope)
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        self.ledger
            .append(EventBody::PublishReport {
                report_id: new_report_id.to_string(),
                lab_id: lab_id.to_string(),
                patient_ref,
                hash: hash_hex,
                sig_lab,
                issued_at,
            })
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        self.ledger
            .append(EventBody::UpdateReport {
                old_report_id: old_report_id.to_string(),
                new_report_id: new_report_id.to_string(),
                lab_id: lab_id.to_string(),
            })
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        self.metrics.record("custody_update_total", 1.0);
        tracing::info!(old_report_id, new_report_id, lab_id, "report updated");
        Ok(())
    }

    /// `share`: the patient unwraps the current content key with their own
    /// private key, rewraps it under `target_pub`, signs the delegation,
    /// and appends a GRANT. Clears any prior soft revocation of the target.
    pub fn share(
        &self,
        report_id_req: &str,
        patient_id: &str,
        patient_priv: &RsaPrivateKey,
        target_id: &str,
        target_pub: &RsaPublicKey,
    ) -> Result<(), ResolveDenial> {
        let st = self.state_of(report_id_req);
        if matches!(
            st.status,
            custody_ledger::ReportStatus::Revoked | custody_ledger::ReportStatus::Unknown
        ) {
            return Err(ResolveDenial::ReportState(st.status));
        }
        let rid = st.current_report_id;
        let env = self.store.get_envelope(&rid).ok_or(ResolveDenial::NotFound)?;

        let key = env
            .ek_for
            .get(patient_id)
            .ok_or(ResolveDenial::NotOwner)
            .and_then(|wrapped| {
                unwrap(patient_priv, wrapped)
                    .map_err(|_| ResolveDenial::UnwrapFailed)
            })?;

        let ek_to = wrap(target_pub, key.as_ref())
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        drop(key);

        let payload = GrantSigPayload {
            report_id: &rid,
            from: patient_id,
            to: target_id,
            ek_to: &ek_to,
        };
        let msg = canonical_json_bytes(&payload)
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        let sig_pat =
            sign(patient_priv, &msg).map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;

        self.ledger
            .append(EventBody::Grant {
                report_id: rid.clone(),
                from: patient_id.to_string(),
                to: target_id.to_string(),
                ek_to,
                sig_pat,
            })
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;

        self.store
            .soft_unrevoke(&rid, target_id)
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;

        self.metrics.record("custody_share_total", 1.0);
        tracing::info!(report_id = %rid, patient_id, target_id, "report shared");
        Ok(())
    }

    /// `unshare`: a policy overlay only. Requires the caller to be the
    /// envelope's patient; does not touch cryptographic material or emit a
    /// ledger event.
    pub fn unshare(
        &self,
        report_id_req: &str,
        patient_id: &str,
        target_id: &str,
    ) -> Result<(), ResolveDenial> {
        let st = self.state_of(report_id_req);
        let rid = st.current_report_id;
        let env = self.store.get_envelope(&rid).ok_or(ResolveDenial::NotFound)?;
        if env.aad.patient_ref != patient_id {
            return Err(ResolveDenial::NotOwner);
        }
        self.store
            .soft_revoke(&rid, target_id)
            .map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?;
        self.metrics.record("custody_unshare_total", 1.0);
        tracing::info!(report_id = %rid, patient_id, target_id, "report unshared");
        Ok(())
    }

    /// `open`: run the full pipeline and return the decrypted plaintext
    /// along with the resolved current report id. Every crypto failure is
    /// redacted to `UnwrapFailed` before being returned, per §7's
    /// oracle-attack policy.
    pub fn open(
        &self,
        requester_id: &str,
        report_id_req: &str,
        requester_priv: &RsaPrivateKey,
    ) -> Result<(Zeroizing<Vec<u8>>, String), ResolveDenial> {
        let start = std::time::Instant::now();
        let span = tracing::info_span!("resolve_open", requester_id, report_id_req);
        let _guard = span.enter();

        let result = (|| {
            let (key, rid, env) = self.resolve_key_internal(requester_id, report_id_req, requester_priv)?;
            let pt = decrypt_with_key(&env, &key)
                .map_err(|_| ResolveDenial::AeadFailure)
                .map_err(ResolveDenial::redact_crypto_failure)?;
            Ok((pt, rid))
        })();

        self.metrics
            .record("custody_open_latency_ms", start.elapsed().as_millis() as f64);
        self.metrics.record(
            if result.is_ok() {
                "custody_open_allowed_total"
            } else {
                "custody_open_denied_total"
            },
            1.0,
        );
        result
    }

    /// `resolve_key`: run the pipeline up to the unwrap step and return the
    /// content key, without decrypting. Used by selective-disclosure-style
    /// verifications that never need the plaintext.
    pub fn resolve_key(
        &self,
        requester_id: &str,
        report_id_req: &str,
        requester_priv: &RsaPrivateKey,
    ) -> Result<(ContentKey, String), ResolveDenial> {
        let (key, rid, _env) =
            self.resolve_key_internal(requester_id, report_id_req, requester_priv)?;
        Ok((key, rid))
    }

    /// `/sd/verify`: the placeholder selective-disclosure check named in
    /// the design notes. This is **not** a cryptographic proof: it recovers
    /// the content key through the normal pipeline, hashes it together with
    /// the canonical JSON of the sorted field-name subset, and compares
    /// against a caller-supplied digest. Treated as out-of-scope for
    /// security review, exactly as specified.
    pub fn sd_verify(
        &self,
        requester_id: &str,
        report_id_req: &str,
        requester_priv: &RsaPrivateKey,
        subset_fields: &[String],
        expected_digest_hex: &str,
    ) -> Result<bool, ResolveDenial> {
        let (key, _rid) = self.resolve_key(requester_id, report_id_req, requester_priv)?;
        let mut sorted = subset_fields.to_vec();
        sorted.sort();
        let mut msg = key.to_vec();
        msg.push(b'|');
        msg.extend_from_slice(
            &canonical_json_bytes(&sorted).map_err(|e| ResolveDenial::InputInvalid(e.to_string()))?,
        );
        let digest = sha256_hex(&msg);
        Ok(digest == expected_digest_hex)
    }

    /// The shared pipeline body (§4.5 steps 1-9): resolves the current
    /// report id, checks soft revocation, fetches and integrity-checks the
    /// envelope against the ledger, verifies the lab signature, resolves
    /// (directly or via a GRANT) the wrap for `requester_id`, and unwraps
    /// the content key. Returns the key, the resolved report id, and the
    /// envelope (needed by `open` to decrypt).
    fn resolve_key_internal(
        &self,
        requester_id: &str,
        report_id_req: &str,
        requester_priv: &RsaPrivateKey,
    ) -> Result<(ContentKey, String, Envelope), ResolveDenial> {
        // Step 1: resolve current version.
        let st = self.state_of(report_id_req);
        if matches!(
            st.status,
            custody_ledger::ReportStatus::Revoked | custody_ledger::ReportStatus::Unknown
        ) {
            return Err(ResolveDenial::ReportState(st.status));
        }
        let rid = st.current_report_id;

        // Step 2: soft-revocation check.
        if self.store.is_soft_revoked(&rid, requester_id) {
            return Err(ResolveDenial::SoftRevoked);
        }

        // Step 3: envelope retrieval.
        let env = self.store.get_envelope(&rid).ok_or(ResolveDenial::NotFound)?;

        // Step 4: AAD integrity.
        let lab_id = env.aad.lab_id.clone();
        let patient_ref = env.aad.patient_ref.clone();
        if lab_id.is_empty() || patient_ref.is_empty() {
            return Err(ResolveDenial::InvalidEnvelope);
        }

        // Step 5: CA/CRL check on the lab.
        if self.registry.in_crl(&lab_id) {
            return Err(ResolveDenial::LabRevokedByCA);
        }

        // Step 6: ledger binding.
        let pub_ev = self
            .ledger
            .get_publish(&rid)
            .ok_or(ResolveDenial::LedgerMissing)?;
        let (ev_lab_id, ev_patient_ref, ev_hash) = match &pub_ev.body {
            EventBody::PublishReport {
                lab_id,
                patient_ref,
                hash,
                ..
            } => (lab_id.clone(), patient_ref.clone(), hash.clone()),
            _ => return Err(ResolveDenial::LedgerMissing),
        };
        let ct_bytes = env
            .ciphertext_bytes()
            .map_err(|_| ResolveDenial::InvalidEnvelope)?;
        let actual_hash = sha256_hex(&ct_bytes);
        if ev_hash != actual_hash {
            return Err(ResolveDenial::LedgerMismatch(MismatchReason::Hash));
        }
        if ev_lab_id != lab_id {
            return Err(ResolveDenial::LedgerMismatch(MismatchReason::LabId));
        }
        if ev_patient_ref != patient_ref {
            return Err(ResolveDenial::LedgerMismatch(MismatchReason::PatientRef));
        }

        // Step 7: lab signature verification.
        let lab_pub = self
            .registry
            .get_cert(&lab_id)
            .and_then(|cert| public_key_from_pem(&cert.pub_pem).ok())
            .ok_or(ResolveDenial::InvalidLabSignature)?;
        let msg = lab_binding_message(&ct_bytes, &env.aad)
            .map_err(|_| ResolveDenial::InvalidEnvelope)?;
        let sig_lab = env.sig_lab.as_deref().unwrap_or("");
        if !verify(&lab_pub, &msg, sig_lab) {
            return Err(ResolveDenial::InvalidLabSignature);
        }

        // Step 8: key resolution (direct wrap, or via the latest GRANT).
        let wrapped = if let Some(direct) = env.ek_for.get(requester_id) {
            direct.clone()
        } else {
            let grants = self.ledger.lookup_grants(&rid, requester_id);
            let grant = grants.last().ok_or(ResolveDenial::NoGrant)?;
            let (from, to, ek_to, sig_pat) = match &grant.body {
                EventBody::Grant {
                    from,
                    to,
                    ek_to,
                    sig_pat,
                    ..
                } => (from.clone(), to.clone(), ek_to.clone(), sig_pat.clone()),
                _ => return Err(ResolveDenial::NoGrant),
            };
            let pat_pub = self
                .registry
                .get_cert(&from)
                .and_then(|cert| public_key_from_pem(&cert.pub_pem).ok())
                .ok_or(ResolveDenial::InvalidGrantSignature)?;
            let payload = GrantSigPayload {
                report_id: &rid,
                from: &from,
                to: &to,
                ek_to: &ek_to,
            };
            let msg = canonical_json_bytes(&payload).map_err(|_| ResolveDenial::InvalidGrantSignature)?;
            if !verify(&pat_pub, &msg, &sig_pat) {
                return Err(ResolveDenial::InvalidGrantSignature);
            }
            ek_to
        };

        // Step 9: unwrap with the requester's own private key, supplied by
        // the caller's process and never stored here.
        let key = unwrap(requester_priv, &wrapped).map_err(|_| ResolveDenial::UnwrapFailed)?;

        Ok((key, rid, env))
    }
}
