//! Streaming chunked AEAD over blob content: ChaCha20-Poly1305 with a per-blob
//! subkey derived via HKDF-SHA256, plus a legacy single-shot scheme for reading
//! blobs written under the older format.

pub mod legacy;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::{EngineError, EngineResult};

/// Subkey derivation domain separator. Preserved verbatim for on-disk compatibility;
/// do not change without a versioned migration.
const HKDF_INFO: &[u8] = b"alexander-sse-blob-encryption-v1";

/// Default plaintext chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

const TAG_LEN: usize = 16;

/// Holds the master key and chunk size needed to encrypt/decrypt blobs.
#[derive(Clone)]
pub struct Cipher {
    master_key: [u8; 32],
    chunk_size: usize,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl Cipher {
    /// Builds a cipher from a 32-byte master key, using the default chunk size.
    #[must_use]
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Overrides the chunk size (primarily for tests that want small chunks).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    fn derive_subkey(&self, content_hash: &str) -> EngineResult<ChaCha20Poly1305> {
        let salt = hex::decode(content_hash)
            .map_err(|e| EngineError::IntegrityFailure(format!("malformed content hash: {e}")))?;
        let hk = Hkdf::<Sha256>::new(Some(&salt), &self.master_key);
        let mut subkey = [0u8; 32];
        hk.expand(HKDF_INFO, &mut subkey)
            .map_err(|_| EngineError::IntegrityFailure("HKDF expand failed".into()))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&subkey)))
    }
}

fn chunk_nonce(index: u64) -> Nonce {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&index.to_be_bytes());
    *Nonce::from_slice(&nonce)
}

fn chunk_ad(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

/// Encrypts `source` chunk-by-chunk into `dest` using the streaming scheme.
pub async fn encrypt_stream<R, W>(
    cipher: &Cipher,
    content_hash: &str,
    source: &mut R,
    dest: &mut W,
) -> EngineResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let aead = cipher.derive_subkey(content_hash)?;
    let mut buf = vec![0u8; cipher.chunk_size];
    let mut index: u64 = 0;

    loop {
        let n = read_full_chunk(source, &mut buf).await?;
        if n == 0 {
            break;
        }
        let ad = chunk_ad(index);
        let ciphertext = aead
            .encrypt(
                &chunk_nonce(index),
                Payload {
                    msg: &buf[..n],
                    aad: &ad,
                },
            )
            .map_err(|_| EngineError::IntegrityFailure("chunk encryption failed".into()))?;
        dest.write_all(&ciphertext)
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        index += 1;
        if n < buf.len() {
            break;
        }
    }
    Ok(())
}

/// Reads up to `buf.len()` bytes, looping until the buffer is full or EOF. Needed because
/// a single `AsyncRead::read` call may return short reads even mid-stream.
async fn read_full_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> EngineResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source
            .read(&mut buf[filled..])
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Decrypts the entirety of `source` into memory. Used for the whole-object read path and
/// as the basis for chunk-aligned range reads (the caller slices the result).
pub async fn decrypt_whole<R>(
    cipher: &Cipher,
    content_hash: &str,
    source: &mut R,
) -> EngineResult<Vec<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let aead = cipher.derive_subkey(content_hash)?;
    let mut ciphertext = Vec::new();
    source
        .read_to_end(&mut ciphertext)
        .await
        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

    let chunk_on_disk = cipher.chunk_size + TAG_LEN;
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    let mut index: u64 = 0;
    for chunk in ciphertext.chunks(chunk_on_disk) {
        let ad = chunk_ad(index);
        let decrypted = aead
            .decrypt(&chunk_nonce(index), Payload { msg: chunk, aad: &ad })
            .map_err(|_| EngineError::IntegrityFailure(format!("chunk {index} failed AEAD verification")))?;
        plaintext.extend_from_slice(&decrypted);
        index += 1;
    }
    Ok(plaintext)
}

/// Decrypts only the chunks covering `[offset, offset+length)` of the plaintext, seeking
/// `source` to the aligned ciphertext position first. Peak memory is bounded by the chunks
/// spanning the requested range rather than the whole blob, unlike [`decrypt_whole`].
pub async fn decrypt_range<R>(
    cipher: &Cipher,
    content_hash: &str,
    source: &mut R,
    offset: u64,
    length: u64,
) -> EngineResult<Vec<u8>>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let aead = cipher.derive_subkey(content_hash)?;
    let chunk_on_disk = (cipher.chunk_size + TAG_LEN) as u64;

    let first_index = offset / cipher.chunk_size as u64;
    let last_index = if length == 0 {
        first_index
    } else {
        (offset + length - 1) / cipher.chunk_size as u64
    };

    source
        .seek(std::io::SeekFrom::Start(first_index * chunk_on_disk))
        .await
        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

    let mut plaintext = Vec::new();
    let mut buf = vec![0u8; chunk_on_disk as usize];
    for index in first_index..=last_index {
        let n = read_full_chunk(source, &mut buf).await?;
        if n == 0 {
            break;
        }
        let ad = chunk_ad(index);
        let decrypted = aead
            .decrypt(&chunk_nonce(index), Payload { msg: &buf[..n], aad: &ad })
            .map_err(|_| EngineError::IntegrityFailure(format!("chunk {index} failed AEAD verification")))?;
        plaintext.extend_from_slice(&decrypted);
    }

    let chunk_start = first_index * cipher.chunk_size as u64;
    let rel_start = (offset - chunk_start) as usize;
    let rel_end = if length == 0 {
        rel_start
    } else {
        (rel_start + length as usize).min(plaintext.len())
    };
    let rel_start = rel_start.min(plaintext.len());
    Ok(plaintext[rel_start..rel_end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher(chunk_size: usize) -> Cipher {
        Cipher::new([7u8; 32]).with_chunk_size(chunk_size)
    }

    fn hash_of(data: &[u8]) -> String {
        use sha2::Digest;
        hex::encode(Sha256::digest(data))
    }

    #[tokio::test]
    async fn test_should_round_trip_single_chunk() {
        let data = b"short secret payload".to_vec();
        let hash = hash_of(&data);
        let cipher = test_cipher(1024);

        let mut ciphertext = Vec::new();
        let mut src = std::io::Cursor::new(data.clone());
        encrypt_stream(&cipher, &hash, &mut src, &mut ciphertext)
            .await
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));

        let mut cursor = std::io::Cursor::new(ciphertext);
        let plaintext = decrypt_whole(&cipher, &hash, &mut cursor)
            .await
            .unwrap_or_else(|e| panic!("decrypt failed: {e}"));
        assert_eq!(plaintext, data);
    }

    #[tokio::test]
    async fn test_should_round_trip_multiple_chunks() {
        let data: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let hash = hash_of(&data);
        let cipher = test_cipher(777);

        let mut ciphertext = Vec::new();
        let mut src = std::io::Cursor::new(data.clone());
        encrypt_stream(&cipher, &hash, &mut src, &mut ciphertext)
            .await
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));

        let mut cursor = std::io::Cursor::new(ciphertext);
        let plaintext = decrypt_whole(&cipher, &hash, &mut cursor)
            .await
            .unwrap_or_else(|e| panic!("decrypt failed: {e}"));
        assert_eq!(plaintext, data);
    }

    #[tokio::test]
    async fn test_should_fail_integrity_on_tampered_ciphertext() {
        let data = b"tamper with me".to_vec();
        let hash = hash_of(&data);
        let cipher = test_cipher(1024);

        let mut ciphertext = Vec::new();
        let mut src = std::io::Cursor::new(data.clone());
        encrypt_stream(&cipher, &hash, &mut src, &mut ciphertext)
            .await
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;

        let mut cursor = std::io::Cursor::new(ciphertext);
        let result = decrypt_whole(&cipher, &hash, &mut cursor).await;
        assert!(matches!(result, Err(EngineError::IntegrityFailure(_))));
    }

    #[tokio::test]
    async fn test_should_derive_distinct_subkeys_per_hash() {
        let cipher = test_cipher(1024);
        let a = cipher.derive_subkey(&hash_of(b"alpha")).unwrap_or_else(|e| panic!("{e}"));
        let b = cipher.derive_subkey(&hash_of(b"beta")).unwrap_or_else(|e| panic!("{e}"));
        // Encrypting the same plaintext+nonce under each subkey must differ.
        let pt = b"same plaintext";
        let ad = chunk_ad(0);
        let ca = a
            .encrypt(&chunk_nonce(0), Payload { msg: pt, aad: &ad })
            .unwrap_or_else(|e| panic!("{e:?}"));
        let cb = b
            .encrypt(&chunk_nonce(0), Payload { msg: pt, aad: &ad })
            .unwrap_or_else(|e| panic!("{e:?}"));
        assert_ne!(ca, cb);
    }

    #[tokio::test]
    async fn test_should_decrypt_range_within_single_chunk() {
        let data: Vec<u8> = (0..2_000u32).map(|i| (i % 251) as u8).collect();
        let hash = hash_of(&data);
        let cipher = test_cipher(777);

        let mut ciphertext = Vec::new();
        let mut src = std::io::Cursor::new(data.clone());
        encrypt_stream(&cipher, &hash, &mut src, &mut ciphertext)
            .await
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));

        let mut cursor = std::io::Cursor::new(ciphertext);
        let got = decrypt_range(&cipher, &hash, &mut cursor, 10, 20)
            .await
            .unwrap_or_else(|e| panic!("decrypt_range failed: {e}"));
        assert_eq!(got, data[10..30]);
    }

    #[tokio::test]
    async fn test_should_decrypt_range_spanning_chunk_boundary() {
        let data: Vec<u8> = (0..2_000u32).map(|i| (i % 251) as u8).collect();
        let hash = hash_of(&data);
        let cipher = test_cipher(777);

        let mut ciphertext = Vec::new();
        let mut src = std::io::Cursor::new(data.clone());
        encrypt_stream(&cipher, &hash, &mut src, &mut ciphertext)
            .await
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));

        // Range [770, 790) straddles the boundary between chunk 0 (bytes 0..777) and chunk 1.
        let mut cursor = std::io::Cursor::new(ciphertext);
        let got = decrypt_range(&cipher, &hash, &mut cursor, 770, 20)
            .await
            .unwrap_or_else(|e| panic!("decrypt_range failed: {e}"));
        assert_eq!(got, data[770..790]);
    }

    #[tokio::test]
    async fn test_should_decrypt_range_at_tail_of_last_chunk() {
        let data: Vec<u8> = (0..2_000u32).map(|i| (i % 251) as u8).collect();
        let hash = hash_of(&data);
        let cipher = test_cipher(777);

        let mut ciphertext = Vec::new();
        let mut src = std::io::Cursor::new(data.clone());
        encrypt_stream(&cipher, &hash, &mut src, &mut ciphertext)
            .await
            .unwrap_or_else(|e| panic!("encrypt failed: {e}"));

        let mut cursor = std::io::Cursor::new(ciphertext);
        let got = decrypt_range(&cipher, &hash, &mut cursor, 1990, 10)
            .await
            .unwrap_or_else(|e| panic!("decrypt_range failed: {e}"));
        assert_eq!(got, data[1990..2000]);
    }
}
