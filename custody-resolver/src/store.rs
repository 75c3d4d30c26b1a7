//! The envelope and soft-revocation key-value store.
//!
//! A single lock protects load/modify/save of both maps together, per the
//! concurrency model: this is coarse-grained but acceptable because the
//! store is tiny compared to ledger throughput.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use custody_spec::Envelope;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Store I/O errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file was not valid JSON.
    #[error("store corrupt: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    envelopes: HashMap<String, Envelope>,
    /// `currentReportId -> set of soft-revoked actor ids`.
    revoked: HashMap<String, HashSet<String>>,
}

/// Envelope storage and the patient soft-revocation overlay, sharing one
/// load/modify/save lock.
#[derive(Clone)]
pub struct EnvelopeStore {
    path: Option<PathBuf>,
    state: Arc<Mutex<StoreState>>,
}

impl EnvelopeStore {
    /// An in-memory store with no backing file.
    pub fn in_memory() -> EnvelopeStore {
        EnvelopeStore {
            path: None,
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    /// Open (or create) a store backed by a JSON file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<EnvelopeStore, StoreError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            StoreState::default()
        };
        Ok(EnvelopeStore {
            path: Some(path),
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Store (or overwrite) the envelope for `report_id`.
    pub fn put_envelope(&self, report_id: &str, envelope: Envelope) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.envelopes.insert(report_id.to_string(), envelope);
        self.persist(&state)
    }

    /// Fetch the envelope stored under `report_id`, if any.
    pub fn get_envelope(&self, report_id: &str) -> Option<Envelope> {
        self.state.lock().envelopes.get(report_id).cloned()
    }

    /// Add `actor_id` to the soft-revocation set for `report_id`.
    pub fn soft_revoke(&self, report_id: &str, actor_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state
            .revoked
            .entry(report_id.to_string())
            .or_default()
            .insert(actor_id.to_string());
        self.persist(&state)
    }

    /// Remove `actor_id` from the soft-revocation set for `report_id` (a re-share).
    pub fn soft_unrevoke(&self, report_id: &str, actor_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(set) = state.revoked.get_mut(report_id) {
            set.remove(actor_id);
        }
        self.persist(&state)
    }

    /// Whether `actor_id` is currently soft-revoked for `report_id`.
    pub fn is_soft_revoked(&self, report_id: &str, actor_id: &str) -> bool {
        self.state
            .lock()
            .revoked
            .get(report_id)
            .map(|set| set.contains(actor_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_spec::Aad;

    fn sample_envelope(report_id: &str) -> Envelope {
        Envelope {
            alg: "AES-256-GCM+RSA-OAEP".into(),
            aad: Aad {
                report_id: report_id.into(),
                lab_id: "LAB-1".into(),
                patient_ref: "PAT-1".into(),
                issued_at: "t".into(),
                exam_type: None,
                result_short: None,
                note: None,
            },
            nonce: "n".into(),
            ciphertext: "c".into(),
            ek_for: HashMap::new().into_iter().collect(),
            sig_lab: Some("s".into()),
        }
    }

    #[test]
    fn soft_revoke_toggle() {
        let store = EnvelopeStore::in_memory();
        store.put_envelope("R1", sample_envelope("R1")).unwrap();
        assert!(!store.is_soft_revoked("R1", "HOSP-1"));
        store.soft_revoke("R1", "HOSP-1").unwrap();
        assert!(store.is_soft_revoked("R1", "HOSP-1"));
        store.soft_unrevoke("R1", "HOSP-1").unwrap();
        assert!(!store.is_soft_revoked("R1", "HOSP-1"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = EnvelopeStore::open(&path).unwrap();
            store.put_envelope("R1", sample_envelope("R1")).unwrap();
            store.soft_revoke("R1", "HOSP-1").unwrap();
        }
        let reopened = EnvelopeStore::open(&path).unwrap();
        assert!(reopened.get_envelope("R1").is_some());
        assert!(reopened.is_soft_revoked("R1", "HOSP-1"));
    }
}
