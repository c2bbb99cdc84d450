//! Legacy single-shot SSE-per-object scheme, retained only so blobs written by
//! older deployments remain readable. New writes always use the streaming scheme
//! in the parent module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{EngineError, EngineResult};

const HKDF_INFO: &[u8] = b"alexander-sse-blob-encryption-v1";
const NONCE_LEN: usize = 12;

fn derive_key(master_key: &[u8; 32], content_hash: &str) -> EngineResult<Aes256Gcm> {
    let salt = hex::decode(content_hash)
        .map_err(|e| EngineError::IntegrityFailure(format!("malformed content hash: {e}")))?;
    let hk = Hkdf::<Sha256>::new(Some(&salt), master_key);
    let mut subkey = [0u8; 32];
    hk.expand(HKDF_INFO, &mut subkey)
        .map_err(|_| EngineError::IntegrityFailure("HKDF expand failed".into()))?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&subkey)))
}

/// Encrypts `plaintext` as `nonce(12) || ciphertext || tag(16)`.
pub fn encrypt_oneshot(master_key: &[u8; 32], content_hash: &str, plaintext: &[u8]) -> EngineResult<Vec<u8>> {
    let cipher = derive_key(master_key, content_hash)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EngineError::IntegrityFailure("legacy encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob of the form `nonce(12) || ciphertext || tag(16)`.
pub fn decrypt_oneshot(master_key: &[u8; 32], content_hash: &str, blob: &[u8]) -> EngineResult<Vec<u8>> {
    if blob.len() < NONCE_LEN {
        return Err(EngineError::IntegrityFailure("blob too short for legacy scheme".into()));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = derive_key(master_key, content_hash)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| EngineError::IntegrityFailure("legacy blob failed AEAD verification".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_round_trip_legacy_scheme() {
        let key = [3u8; 32];
        let hash = "a".repeat(64);
        let plaintext = b"legacy payload".to_vec();
        let ciphertext = encrypt_oneshot(&key, &hash, &plaintext)
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));
        let decrypted = decrypt_oneshot(&key, &hash, &ciphertext)
            .unwrap_or_else(|e| panic!("decrypt failed: {e}"));
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_should_reject_tampered_legacy_blob() {
        let key = [3u8; 32];
        let hash = "b".repeat(64);
        let mut ciphertext = encrypt_oneshot(&key, &hash, b"data")
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 1;
        assert!(decrypt_oneshot(&key, &hash, &ciphertext).is_err());
    }
}
