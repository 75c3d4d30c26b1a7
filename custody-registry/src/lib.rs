//! Advisory certificate registry: enrolls actor public keys and publishes
//! revocations.
//!
//! The resolver consults this registry but never trusts it for the binding
//! that actually matters cryptographically — that is always the
//! envelope+ledger hash+signature chain. Losing this registry (or an
//! operator forgetting to call `revoke`) weakens an audit trail, not the
//! cryptography.
#![deny(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Registry errors: only I/O and (de)serialization, since enroll/revoke/
/// query never themselves fail on valid input.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The backing store file could not be read or written.
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing store file was not valid JSON.
    #[error("registry store corrupt: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A certificate record as returned by `enroll` and `get_cert`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cert {
    /// The enrolled actor's id.
    #[serde(rename = "actorId")]
    pub actor_id: String,
    /// SubjectPublicKeyInfo PEM of the enrolled public key.
    pub pub_pem: String,
    /// Unix seconds at enrollment time.
    #[serde(rename = "issuedAt")]
    pub issued_at: u64,
    /// Whether the cert is currently valid (false once revoked).
    pub valid: bool,
}

/// One CRL entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlEntry {
    /// The revoked actor's id.
    #[serde(rename = "actorId")]
    pub actor_id: String,
    /// Unix seconds at revocation time.
    #[serde(rename = "revokedAt")]
    pub revoked_at: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    certs: HashMap<String, Cert>,
    crl: Vec<CrlEntry>,
}

/// The CA/CRL registry: two maps (`certs`, `crl`) guarded by a single lock,
/// optionally persisted to a JSON file on every mutation.
#[derive(Clone)]
pub struct Registry {
    path: Option<PathBuf>,
    state: Arc<RwLock<RegistryState>>,
}

impl Registry {
    /// An in-memory registry with no backing file (used by tests and the
    /// CLI's ephemeral `seed` routine).
    pub fn in_memory() -> Registry {
        Registry {
            path: None,
            state: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Open (or create) a registry backed by a JSON file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Registry, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            RegistryState::default()
        };
        Ok(Registry {
            path: Some(path),
            state: Arc::new(RwLock::new(state)),
        })
    }

    fn persist(&self, state: &RegistryState) -> Result<(), RegistryError> {
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

    /// Upsert `actor_id`'s public key PEM and mark it valid.
    pub fn enroll(&self, actor_id: &str, pub_pem: &str) -> Result<Cert, RegistryError> {
        let mut state = self.state.write();
        let cert = Cert {
            actor_id: actor_id.to_string(),
            pub_pem: pub_pem.to_string(),
            issued_at: now_unix_seconds(),
            valid: true,
        };
        state.certs.insert(actor_id.to_string(), cert.clone());
        self.persist(&state)?;
        tracing::info!(actor_id, "actor enrolled");
        Ok(cert)
    }

    /// Append a CRL entry for `actor_id` and flip its cert invalid, if enrolled.
    pub fn revoke(&self, actor_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state.crl.push(CrlEntry {
            actor_id: actor_id.to_string(),
            revoked_at: now_unix_seconds(),
        });
        if let Some(cert) = state.certs.get_mut(actor_id) {
            cert.valid = false;
        }
        self.persist(&state)?;
        tracing::info!(actor_id, "actor revoked");
        Ok(())
    }

    /// Fetch the enrolled cert for `actor_id`, if any.
    pub fn get_cert(&self, actor_id: &str) -> Option<Cert> {
        self.state.read().certs.get(actor_id).cloned()
    }

    /// Whether `actor_id` appears anywhere in the CRL.
    pub fn in_crl(&self, actor_id: &str) -> bool {
        self.state.read().crl.iter().any(|e| e.actor_id == actor_id)
    }
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_then_revoke_flips_valid_and_adds_crl_entry() {
        let reg = Registry::in_memory();
        reg.enroll("LAB-1", "PEM-DATA").unwrap();
        assert!(reg.get_cert("LAB-1").unwrap().valid);
        assert!(!reg.in_crl("LAB-1"));

        reg.revoke("LAB-1").unwrap();
        assert!(!reg.get_cert("LAB-1").unwrap().valid);
        assert!(reg.in_crl("LAB-1"));
    }

    #[test]
    fn revoke_of_unknown_actor_still_records_crl_entry() {
        let reg = Registry::in_memory();
        reg.revoke("GHOST-1").unwrap();
        assert!(reg.in_crl("GHOST-1"));
        assert!(reg.get_cert("GHOST-1").is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca_db.json");
        {
            let reg = Registry::open(&path).unwrap();
            reg.enroll("LAB-1", "PEM-DATA").unwrap();
        }
        let reopened = Registry::open(&path).unwrap();
        assert!(reopened.get_cert("LAB-1").is_some());
    }
}
