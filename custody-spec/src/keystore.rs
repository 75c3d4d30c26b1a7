//! On-disk per-actor key file layout: `{actorId}_priv.pem` / `{actorId}_pub.pem`
//! under a single keys directory, mirroring the source's `_key_paths` /
//! `ensure_actor_keys` convention. This is the one piece of the system where
//! a private key ever touches disk; it exists so the daemon and CLI have
//! somewhere durable to keep actor keys between runs, not as a hardware or
//! HSM-backed custody story.

use std::path::{Path, PathBuf};

use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::PrimitiveError;
use crate::primitives::{
    gen_rsa_keypair, private_key_from_pem, private_key_to_pem, public_key_from_pem,
    public_key_to_pem,
};

/// A directory of `{actorId}_priv.pem` / `{actorId}_pub.pem` files.
#[derive(Debug, Clone)]
pub struct ActorKeyStore {
    dir: PathBuf,
}

impl ActorKeyStore {
    /// Use (creating if absent) `dir` as the key file directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<ActorKeyStore, PrimitiveError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(ActorKeyStore { dir })
    }

    fn priv_path(&self, actor_id: &str) -> PathBuf {
        self.dir.join(format!("{actor_id}_priv.pem"))
    }

    fn pub_path(&self, actor_id: &str) -> PathBuf {
        self.dir.join(format!("{actor_id}_pub.pem"))
    }

    /// Generate and persist a fresh keypair for `actor_id` if one is not
    /// already on disk; either way, return the actor's keypair.
    pub fn ensure_keys(
        &self,
        actor_id: &str,
    ) -> Result<(RsaPrivateKey, RsaPublicKey), PrimitiveError> {
        let (priv_path, pub_path) = (self.priv_path(actor_id), self.pub_path(actor_id));
        if priv_path.exists() && pub_path.exists() {
            return self.load_keys(actor_id);
        }
        let (priv_key, pub_key) = gen_rsa_keypair()?;
        std::fs::write(&priv_path, private_key_to_pem(&priv_key)?)?;
        std::fs::write(&pub_path, public_key_to_pem(&pub_key)?)?;
        tracing::info!(actor_id, "generated and persisted actor keypair");
        Ok((priv_key, pub_key))
    }

    /// Load an existing actor's keypair from disk.
    pub fn load_keys(
        &self,
        actor_id: &str,
    ) -> Result<(RsaPrivateKey, RsaPublicKey), PrimitiveError> {
        let priv_pem = std::fs::read_to_string(self.priv_path(actor_id))?;
        let pub_pem = std::fs::read_to_string(self.pub_path(actor_id))?;
        Ok((private_key_from_pem(&priv_pem)?, public_key_from_pem(&pub_pem)?))
    }

    /// Load just the public key, generating a keypair first if none exists yet.
    pub fn ensure_public_pem(&self, actor_id: &str) -> Result<String, PrimitiveError> {
        self.ensure_keys(actor_id)?;
        std::fs::read_to_string(self.pub_path(actor_id)).map_err(PrimitiveError::from)
    }

    /// Whether `actor_id` already has keys on disk.
    pub fn has_keys(&self, actor_id: &str) -> bool {
        self.priv_path(actor_id).exists() && self.pub_path(actor_id).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_keys_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActorKeyStore::open(dir.path()).unwrap();
        let (priv1, _) = store.ensure_keys("LAB-1").unwrap();
        let (priv2, _) = store.ensure_keys("LAB-1").unwrap();
        assert_eq!(
            private_key_to_pem(&priv1).unwrap(),
            private_key_to_pem(&priv2).unwrap()
        );
    }

    #[test]
    fn has_keys_reflects_disk_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ActorKeyStore::open(dir.path()).unwrap();
        assert!(!store.has_keys("PAT-1"));
        store.ensure_keys("PAT-1").unwrap();
        assert!(store.has_keys("PAT-1"));
    }
}
