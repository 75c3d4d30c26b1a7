//! Canonical primitives: Base64, SHA-256, RSA-3072 keys, RSA-PSS signatures,
//! RSA-OAEP key wrap, and AES-256-GCM content encryption.
//!
//! Every function here has a total signature: invalid input, authentication
//! failure, and I/O failure are distinguished by [`PrimitiveError`] variants
//! rather than by panicking or by a bare boolean, with the one deliberate
//! exception of [`verify`], which is specified to never fail loudly.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::PrimitiveError;

/// Default RSA modulus size in bits, per the data model (RSA-3072).
pub const RSA_BITS: usize = 3072;
/// Length in bytes of the AES-256-GCM content key.
pub const CONTENT_KEY_LEN: usize = 32;
/// Length in bytes of the AES-GCM nonce.
pub const NONCE_LEN: usize = 12;

/// A 32-byte AES-256-GCM content key that zeroizes its backing memory on drop.
pub type ContentKey = Zeroizing<[u8; CONTENT_KEY_LEN]>;

/// SHA-256 digest of `data`, as raw bytes.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lower-case hex encoding, used for `txId` and the ledger PUBLISH event's
/// `hash` field. Small enough that this workspace does not pull in a
/// dedicated hex crate for it.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Convenience: `hex_encode(&sha256_bytes(data))`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&sha256_bytes(data))
}

/// Base64-encode (standard alphabet, padded).
pub fn b64_encode(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Base64-decode (standard alphabet, padded).
pub fn b64_decode(s: &str) -> Result<Vec<u8>, PrimitiveError> {
    B64.decode(s).map_err(PrimitiveError::Base64)
}

/// Generate a fresh RSA-3072 keypair.
pub fn gen_rsa_keypair() -> Result<(RsaPrivateKey, RsaPublicKey), PrimitiveError> {
    let priv_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)?;
    let pub_key = RsaPublicKey::from(&priv_key);
    Ok((priv_key, pub_key))
}

/// Encode a private key as unencrypted PKCS#8 PEM.
pub fn private_key_to_pem(key: &RsaPrivateKey) -> Result<String, PrimitiveError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|s| s.to_string())
        .map_err(|e| PrimitiveError::KeyEncoding(e.to_string()))
}

/// Decode a private key from PKCS#8 PEM.
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey, PrimitiveError> {
    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| PrimitiveError::KeyEncoding(e.to_string()))
}

/// Encode a public key as SubjectPublicKeyInfo PEM.
pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, PrimitiveError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| PrimitiveError::KeyEncoding(e.to_string()))
}

/// Decode a public key from SubjectPublicKeyInfo PEM.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, PrimitiveError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| PrimitiveError::KeyEncoding(e.to_string()))
}

/// Sign `msg` with RSA-PSS, MGF1-SHA-256, digest SHA-256. Returns Base64.
pub fn sign(priv_key: &RsaPrivateKey, msg: &[u8]) -> Result<String, PrimitiveError> {
    let digest = sha256_bytes(msg);
    let padding = Pss::new::<Sha256>();
    let sig = priv_key.sign_with_rng(&mut OsRng, padding, &digest)?;
    Ok(b64_encode(&sig))
}

/// Verify an RSA-PSS-SHA-256 signature. Never errors; malformed input simply
/// fails to verify.
pub fn verify(pub_key: &RsaPublicKey, msg: &[u8], b64sig: &str) -> bool {
    let Ok(sig) = b64_decode(b64sig) else {
        return false;
    };
    let digest = sha256_bytes(msg);
    let padding = Pss::new::<Sha256>();
    pub_key.verify(padding, &digest, &sig).is_ok()
}

/// Wrap a 32-byte content key with RSA-OAEP (MGF1-SHA-256, SHA-256, empty
/// label). Returns Base64.
pub fn wrap(pub_key: &RsaPublicKey, key: &[u8]) -> Result<String, PrimitiveError> {
    let padding = Oaep::new::<Sha256>();
    let ct = pub_key.encrypt(&mut OsRng, padding, key)?;
    Ok(b64_encode(&ct))
}

/// Unwrap an RSA-OAEP-wrapped key, returning exactly [`CONTENT_KEY_LEN`] bytes.
///
/// Malformed Base64, a ciphertext the private key cannot decrypt, or a
/// decrypted payload of the wrong length all map onto
/// [`PrimitiveError::UnwrapFailed`] so that resolver callers can coalesce
/// them into a single non-oracle-leaking denial, per the error handling
/// policy.
pub fn unwrap(priv_key: &RsaPrivateKey, b64wrapped: &str) -> Result<ContentKey, PrimitiveError> {
    let ct = b64_decode(b64wrapped).map_err(|_| PrimitiveError::UnwrapFailed)?;
    let padding = Oaep::new::<Sha256>();
    let pt = priv_key
        .decrypt(padding, &ct)
        .map_err(|_| PrimitiveError::UnwrapFailed)?;
    if pt.len() != CONTENT_KEY_LEN {
        return Err(PrimitiveError::UnwrapFailed);
    }
    let mut key = [0u8; CONTENT_KEY_LEN];
    key.copy_from_slice(&pt);
    Ok(Zeroizing::new(key))
}

/// Generate a fresh random AES-256-GCM content key.
pub fn gen_content_key() -> ContentKey {
    let mut key = [0u8; CONTENT_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    Zeroizing::new(key)
}

/// Generate a fresh random 12-byte nonce.
pub fn gen_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under AES-256-GCM with `aad` bound as associated data.
pub fn aead_encrypt(
    key: &ContentKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, PrimitiveError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| PrimitiveError::InvalidInput(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| PrimitiveError::AeadFailure)
}

/// Decrypt and authenticate `ciphertext` under AES-256-GCM with `aad`.
pub fn aead_decrypt(
    key: &ContentKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| PrimitiveError::InvalidInput(e.to_string()))?;
    let pt = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| PrimitiveError::AeadFailure)?;
    Ok(Zeroizing::new(pt))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::OnceLock;

    fn fixed_keypair() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static KP: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        KP.get_or_init(|| gen_rsa_keypair().unwrap())
    }

    proptest! {
        #[test]
        fn sha256_hex_is_pure_and_distinguishes_distinct_inputs(
            a in proptest::collection::vec(any::<u8>(), 0..256),
            b in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assert_eq!(sha256_hex(&a), sha256_hex(&a));
            if a != b {
                prop_assert_ne!(sha256_hex(&a), sha256_hex(&b));
            }
        }

        #[test]
        fn aead_round_trip_holds_and_any_bit_flip_breaks_it(
            pt in proptest::collection::vec(any::<u8>(), 0..512),
            aad in proptest::collection::vec(any::<u8>(), 0..128),
            flip_index in any::<u8>(),
        ) {
            let key = gen_content_key();
            let nonce = gen_nonce();
            let ct = aead_encrypt(&key, &nonce, &pt, &aad).unwrap();
            let decrypted = aead_decrypt(&key, &nonce, &ct, &aad).unwrap();
            prop_assert_eq!(&*decrypted, pt.as_slice());

            if !ct.is_empty() {
                let idx = (flip_index as usize) % ct.len();
                let mut tampered_ct = ct.clone();
                tampered_ct[idx] ^= 0xFF;
                prop_assert!(aead_decrypt(&key, &nonce, &tampered_ct, &aad).is_err());
            }
            if !aad.is_empty() {
                let idx = (flip_index as usize) % aad.len();
                let mut tampered_aad = aad.clone();
                tampered_aad[idx] ^= 0xFF;
                prop_assert!(aead_decrypt(&key, &nonce, &ct, &tampered_aad).is_err());
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        #[test]
        fn sign_verify_holds_for_arbitrary_messages_and_fails_on_mutation(
            msg in proptest::collection::vec(any::<u8>(), 1..256),
            mutate_index in any::<u8>(),
        ) {
            let (priv_key, pub_key) = fixed_keypair();
            let sig = sign(priv_key, &msg).unwrap();
            prop_assert!(verify(pub_key, &msg, &sig));

            let idx = (mutate_index as usize) % msg.len();
            let mut mutated = msg.clone();
            mutated[idx] ^= 0xFF;
            prop_assert!(!verify(pub_key, &mutated, &sig));
        }

        #[test]
        fn wrap_unwrap_round_trips_for_arbitrary_content_keys(
            seed in any::<[u8; CONTENT_KEY_LEN]>(),
        ) {
            let (priv_key, pub_key) = fixed_keypair();
            let key: ContentKey = Zeroizing::new(seed);
            let wrapped = wrap(pub_key, key.as_ref()).unwrap();
            let unwrapped = unwrap(priv_key, &wrapped).unwrap();
            prop_assert_eq!(&*unwrapped, &*key);
        }
    }
}
