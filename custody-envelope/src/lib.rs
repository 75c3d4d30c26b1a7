//! Builds and opens hybrid envelopes: a fresh AES-256-GCM content key,
//! ciphertext bound to canonical AAD, and a per-recipient RSA-OAEP wrap of
//! that key.
//!
//! This crate never signs. The lab binding (`sig_lab`) is the orchestrator's
//! job — see [`lab_binding_message`] for the exact bytes it must sign —
//! because ordering the signature over the ciphertext bytes rather than the
//! envelope's Base64 text makes it independent of any particular encoding
//! choice.
#![deny(missing_docs)]

use std::collections::BTreeMap;

use custody_spec::canonical::canonical_json_bytes;
use custody_spec::primitives::{
    aead_decrypt, aead_encrypt, b64_decode, b64_encode, gen_content_key, gen_nonce, sha256_bytes,
    unwrap, wrap, CONTENT_KEY_LEN, NONCE_LEN,
};
use custody_spec::{Aad, Envelope, PrimitiveError, ENVELOPE_ALG};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// Errors from building or opening an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// A lower-level primitive failed (Base64, AEAD setup, RSA error).
    #[error(transparent)]
    Primitive(#[from] PrimitiveError),
    /// `decrypt_envelope` was called for a recipient with no entry in `ek_for`.
    #[error("no key for recipient")]
    NoKeyForRecipient,
    /// RSA-OAEP unwrap of the content key failed.
    #[error("key unwrap failed")]
    UnwrapFailed,
    /// AES-256-GCM authentication failed.
    #[error("aead authentication failed")]
    AeadFailure,
}

/// Build a fresh hybrid envelope for `plaintext`, bound to `aad`, with a
/// wrapped copy of the content key for each entry in `recipients`.
///
/// The returned envelope has no `sig_lab`; the caller must sign
/// [`lab_binding_message`] and set it before persisting the envelope, per
/// the access-resolver's ledger-binding invariant.
pub fn encrypt_for_recipients(
    plaintext: &[u8],
    aad: Aad,
    recipients: &BTreeMap<String, RsaPublicKey>,
) -> Result<Envelope, EnvelopeError> {
    let key = gen_content_key();
    let nonce = gen_nonce();
    let aad_bytes = canonical_json_bytes(&aad)?;

    let ciphertext = aead_encrypt(&key, &nonce, plaintext, &aad_bytes)?;

    let mut ek_for = BTreeMap::new();
    for (rid, pub_key) in recipients {
        let wrapped = wrap(pub_key, key.as_ref())?;
        ek_for.insert(rid.clone(), wrapped);
    }
    // `key` is a `Zeroizing<[u8; 32]>`; it zeroizes on drop here once every
    // recipient has its wrap.

    tracing::debug!(
        recipients = ek_for.len(),
        plaintext_len = plaintext.len(),
        "envelope built"
    );

    Ok(Envelope {
        alg: ENVELOPE_ALG.to_string(),
        aad,
        nonce: b64_encode(&nonce),
        ciphertext: b64_encode(&ciphertext),
        ek_for,
        sig_lab: None,
    })
}

/// Recover the plaintext content key under `recipient_id`'s wrap, then
/// decrypt and authenticate the ciphertext under the envelope's AAD.
///
/// The content key is zeroized as soon as decryption completes, on every
/// return path.
pub fn decrypt_envelope(
    env: &Envelope,
    priv_key: &RsaPrivateKey,
    recipient_id: &str,
) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
    let wrapped = env
        .ek_for
        .get(recipient_id)
        .ok_or(EnvelopeError::NoKeyForRecipient)?;
    let key = unwrap(priv_key, wrapped).map_err(|_| EnvelopeError::UnwrapFailed)?;

    decrypt_with_key(env, &key)
}

/// Decrypt the envelope given an already-resolved content key, e.g. one
/// obtained through a GRANT rewrap rather than the lab's direct `ek_for` entry.
pub fn decrypt_with_key(
    env: &Envelope,
    key: &Zeroizing<[u8; CONTENT_KEY_LEN]>,
) -> Result<Zeroizing<Vec<u8>>, EnvelopeError> {
    let aad_bytes = canonical_json_bytes(&env.aad)?;
    let nonce = decode_nonce(&env.nonce)?;
    let ciphertext = env
        .ciphertext_bytes()
        .map_err(|e| EnvelopeError::Primitive(PrimitiveError::Base64(e)))?;
    aead_decrypt(key, &nonce, &ciphertext, &aad_bytes).map_err(|_| EnvelopeError::AeadFailure)
}

fn decode_nonce(b64: &str) -> Result<[u8; NONCE_LEN], EnvelopeError> {
    let bytes = b64_decode(b64)?;
    if bytes.len() != NONCE_LEN {
        return Err(EnvelopeError::Primitive(PrimitiveError::InvalidInput(
            "nonce must be 12 bytes".into(),
        )));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes);
    Ok(nonce)
}

/// The exact bytes the lab signs and every verifier recomputes:
/// `SHA-256(ciphertext_bytes) ∥ canonical_json(aad)`.
pub fn lab_binding_message(ciphertext_bytes: &[u8], aad: &Aad) -> Result<Vec<u8>, EnvelopeError> {
    let mut msg = sha256_bytes(ciphertext_bytes).to_vec();
    msg.extend_from_slice(&canonical_json_bytes(aad)?);
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_spec::primitives::gen_rsa_keypair;

    fn sample_aad(report_id: &str) -> Aad {
        Aad {
            report_id: report_id.into(),
            lab_id: "LAB-1".into(),
            patient_ref: "PAT-1".into(),
            issued_at: "2026-01-01T00:00:00Z".into(),
            exam_type: None,
            result_short: None,
            note: None,
        }
    }

    #[test]
    fn round_trip_for_every_recipient() {
        let (pat_priv, pat_pub) = gen_rsa_keypair().unwrap();
        let (hosp_priv, hosp_pub) = gen_rsa_keypair().unwrap();
        let mut recipients = BTreeMap::new();
        recipients.insert("PAT-1".to_string(), pat_pub);
        recipients.insert("HOSP-1".to_string(), hosp_pub);

        let env = encrypt_for_recipients(b"hello", sample_aad("R1"), &recipients).unwrap();

        let pt_pat = decrypt_envelope(&env, &pat_priv, "PAT-1").unwrap();
        assert_eq!(&*pt_pat, b"hello");
        let pt_hosp = decrypt_envelope(&env, &hosp_priv, "HOSP-1").unwrap();
        assert_eq!(&*pt_hosp, b"hello");
    }

    #[test]
    fn missing_recipient_is_denied() {
        let (pat_priv, pat_pub) = gen_rsa_keypair().unwrap();
        let mut recipients = BTreeMap::new();
        recipients.insert("PAT-1".to_string(), pat_pub);
        let env = encrypt_for_recipients(b"hello", sample_aad("R1"), &recipients).unwrap();

        let err = decrypt_envelope(&env, &pat_priv, "HOSP-1").unwrap_err();
        assert!(matches!(err, EnvelopeError::NoKeyForRecipient));
    }

    #[test]
    fn tampered_ciphertext_fails_aead() {
        let (pat_priv, pat_pub) = gen_rsa_keypair().unwrap();
        let mut recipients = BTreeMap::new();
        recipients.insert("PAT-1".to_string(), pat_pub);
        let mut env = encrypt_for_recipients(b"hello", sample_aad("R1"), &recipients).unwrap();

        let mut ct = env.ciphertext_bytes().unwrap();
        ct[0] ^= 0xFF;
        env.ciphertext = b64_encode(&ct);

        let err = decrypt_envelope(&env, &pat_priv, "PAT-1").unwrap_err();
        assert!(matches!(err, EnvelopeError::AeadFailure));
    }

    #[test]
    fn tampered_aad_fails_aead() {
        let (pat_priv, pat_pub) = gen_rsa_keypair().unwrap();
        let mut recipients = BTreeMap::new();
        recipients.insert("PAT-1".to_string(), pat_pub);
        let mut env = encrypt_for_recipients(b"hello", sample_aad("R1"), &recipients).unwrap();

        env.aad.note = Some("injected".into());

        let err = decrypt_envelope(&env, &pat_priv, "PAT-1").unwrap_err();
        assert!(matches!(err, EnvelopeError::AeadFailure));
    }

    #[test]
    fn lab_binding_message_is_sensitive_to_aad_mutation() {
        let (_priv, _pub) = gen_rsa_keypair().unwrap();
        let ct = b"ciphertext-bytes";
        let aad1 = sample_aad("R1");
        let mut aad2 = aad1.clone();
        aad2.note = Some("x".into());
        assert_ne!(
            lab_binding_message(ct, &aad1).unwrap(),
            lab_binding_message(ct, &aad2).unwrap()
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use custody_spec::primitives::gen_rsa_keypair;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn fixed_keypair() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static KP: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        KP.get_or_init(|| gen_rsa_keypair().unwrap())
    }

    fn aad_with_note(note: String) -> Aad {
        Aad {
            report_id: "R1".into(),
            lab_id: "LAB-1".into(),
            patient_ref: "PAT-1".into(),
            issued_at: "2026-01-01T00:00:00Z".into(),
            exam_type: None,
            result_short: None,
            note: Some(note),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn round_trip_holds_for_arbitrary_plaintext_and_note(
            pt in proptest::collection::vec(any::<u8>(), 0..256),
            note in "[ -~]{0,40}",
        ) {
            let (priv_key, pub_key) = fixed_keypair();
            let mut recipients = BTreeMap::new();
            recipients.insert("PAT-1".to_string(), pub_key.clone());
            let env = encrypt_for_recipients(&pt, aad_with_note(note), &recipients).unwrap();
            let decrypted = decrypt_envelope(&env, priv_key, "PAT-1").unwrap();
            prop_assert_eq!(&*decrypted, pt.as_slice());
        }

        #[test]
        fn any_aad_mutation_changes_the_lab_binding_message(
            note_a in "[ -~]{0,40}",
            note_b in "[ -~]{0,40}",
        ) {
            prop_assume!(note_a != note_b);
            let ct = b"some-ciphertext-bytes";
            let msg_a = lab_binding_message(ct, &aad_with_note(note_a)).unwrap();
            let msg_b = lab_binding_message(ct, &aad_with_note(note_b)).unwrap();
            prop_assert_ne!(msg_a, msg_b);
        }
    }
}
