//! Content-addressed blob store: a sharded on-disk tree keyed by SHA-256 of the
//! plaintext, with streaming writes, dedup, and chunk-aligned range reads.

pub mod shard_lock;

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::checksums::StreamingMd5;
use crate::config::{CryptoConfig, CryptoScheme, StorageConfig};
use crate::crypto::{self, Cipher};
use crate::error::{EngineError, EngineResult};
use shard_lock::ShardLockPool;

/// A boxed async byte stream, the currency the blob store reads and writes in.
pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Outcome of a successful `store` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResult {
    /// Hex SHA-256 of the plaintext.
    pub content_hash: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Whether this call found an existing blob (dedup hit) vs. wrote a new one.
    pub deduplicated: bool,
    /// Hex MD5 of the plaintext, computed in the same pass as the content hash. Callers
    /// use this directly as an S3 ETag instead of re-hashing the body themselves.
    pub md5_hex: String,
}

/// The Blob Store contract: store/retrieve/retrieve_range/delete/exists/size_on_disk.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams `reader` into content-addressed storage, verifying the observed size
    /// matches `declared_size`.
    async fn store(&self, reader: BoxedAsyncRead, declared_size: u64) -> EngineResult<StoreResult>;

    /// Opens a reader over the full plaintext of `content_hash`.
    async fn retrieve(&self, content_hash: &str) -> EngineResult<BoxedAsyncRead>;

    /// Opens a reader over `[offset, offset+length)` of the plaintext of `content_hash`.
    async fn retrieve_range(
        &self,
        content_hash: &str,
        offset: u64,
        length: u64,
    ) -> EngineResult<BoxedAsyncRead>;

    /// Removes the on-disk file for `content_hash`. Idempotent if already absent.
    async fn delete(&self, content_hash: &str) -> EngineResult<()>;

    /// True if a blob file exists for `content_hash`.
    async fn exists(&self, content_hash: &str) -> EngineResult<bool>;

    /// Size in bytes of the on-disk file (ciphertext size if encrypted).
    async fn size_on_disk(&self, content_hash: &str) -> EngineResult<u64>;
}

/// Filesystem-backed implementation of [`BlobStore`].
#[derive(Debug)]
pub struct FsBlobStore {
    storage: StorageConfig,
    crypto: CryptoConfig,
    locks: ShardLockPool,
}

impl FsBlobStore {
    /// Builds a store rooted at `storage.data_dir`, encrypting new writes per `crypto`.
    #[must_use]
    pub fn new(storage: StorageConfig, crypto: CryptoConfig) -> Self {
        Self {
            storage,
            crypto,
            locks: ShardLockPool::new(),
        }
    }

    fn shard_path(&self, content_hash: &str) -> PathBuf {
        let mut path = self.storage.data_dir.clone();
        let width = self.storage.shard_width.max(1);
        let mut cursor = 0;
        for _ in 0..self.storage.shard_depth {
            let end = (cursor + width).min(content_hash.len());
            path.push(&content_hash[cursor..end]);
            cursor = end;
        }
        path.push(content_hash);
        path
    }

    fn temp_dir(&self) -> PathBuf {
        self.storage.effective_temp_dir()
    }

    /// Removes leftover temp files and torn `.encrypting` writes. Safe to call repeatedly;
    /// intended to run once at startup before serving traffic.
    pub async fn run_janitor(&self) -> EngineResult<()> {
        tokio::fs::create_dir_all(self.temp_dir())
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        clear_dir(&self.temp_dir()).await?;
        remove_encrypting_leftovers(&self.storage.data_dir).await?;
        Ok(())
    }

    fn active_cipher(&self) -> Option<Cipher> {
        match self.crypto.scheme {
            CryptoScheme::None => None,
            CryptoScheme::ChaCha20Poly1305Streaming | CryptoScheme::Aes256GcmLegacy => {
                self.crypto.master_key.map(Cipher::new)
            }
        }
    }
}

async fn clear_dir(dir: &Path) -> EngineResult<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(EngineError::StorageUnavailable(e.to_string())),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?
    {
        let _ = tokio::fs::remove_file(entry.path()).await;
    }
    Ok(())
}

fn remove_encrypting_leftovers(root: &Path) -> Pin<Box<dyn std::future::Future<Output = EngineResult<()>> + Send + '_>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(EngineError::StorageUnavailable(e.to_string())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
            if file_type.is_dir() {
                remove_encrypting_leftovers(&path).await?;
            } else if path.extension().is_some_and(|ext| ext == "encrypting") {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    })
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(&self, mut reader: BoxedAsyncRead, declared_size: u64) -> EngineResult<StoreResult> {
        tokio::fs::create_dir_all(self.temp_dir())
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

        let temp_path = self.temp_dir().join(uuid::Uuid::new_v4().to_string());
        let mut temp_file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

        let mut hasher = Sha256::new();
        let mut md5 = StreamingMd5::new();
        let mut observed: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            md5.update(&buf[..n]);
            observed += n as u64;
            temp_file
                .write_all(&buf[..n])
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        }
        temp_file
            .flush()
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

        if observed != declared_size {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(EngineError::SizeMismatch {
                declared: declared_size,
                observed,
            });
        }

        let content_hash = hex::encode(hasher.finalize());
        let md5_hex = md5.finalize_etag();
        let _guard = self.locks.acquire(&content_hash).await;

        let final_path = self.shard_path(&content_hash);
        if tokio::fs::metadata(&final_path).await.is_ok() {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Ok(StoreResult {
                content_hash,
                size: observed,
                deduplicated: true,
                md5_hex,
            });
        }

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        }

        let mut source = tokio::fs::File::open(&temp_path)
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        source
            .seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

        let encrypting_path = path_with_suffix(&final_path, "encrypting");
        {
            let mut dest = tokio::fs::File::create(&encrypting_path)
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

            match self.active_cipher() {
                Some(cipher) => {
                    crypto::encrypt_stream(&cipher, &content_hash, &mut source, &mut dest)
                        .await?;
                }
                None => {
                    tokio::io::copy(&mut source, &mut dest)
                        .await
                        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
                }
            }
            dest.flush()
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
            dest.sync_all()
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        }

        tokio::fs::rename(&encrypting_path, &final_path)
            .await
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
        let _ = tokio::fs::remove_file(&temp_path).await;

        Ok(StoreResult {
            content_hash,
            size: observed,
            deduplicated: false,
            md5_hex,
        })
    }

    async fn retrieve(&self, content_hash: &str) -> EngineResult<BoxedAsyncRead> {
        self.retrieve_range_impl(content_hash, None).await
    }

    async fn retrieve_range(
        &self,
        content_hash: &str,
        offset: u64,
        length: u64,
    ) -> EngineResult<BoxedAsyncRead> {
        self.retrieve_range_impl(content_hash, Some((offset, length)))
            .await
    }

    async fn delete(&self, content_hash: &str) -> EngineResult<()> {
        let _guard = self.locks.acquire(content_hash).await;
        let path = self.shard_path(content_hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::StorageUnavailable(e.to_string())),
        }
    }

    async fn exists(&self, content_hash: &str) -> EngineResult<bool> {
        Ok(tokio::fs::metadata(self.shard_path(content_hash)).await.is_ok())
    }

    async fn size_on_disk(&self, content_hash: &str) -> EngineResult<u64> {
        let meta = tokio::fs::metadata(self.shard_path(content_hash))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::BlobNotFound(content_hash.to_string())
                } else {
                    EngineError::StorageUnavailable(e.to_string())
                }
            })?;
        Ok(meta.len())
    }
}

impl FsBlobStore {
    async fn retrieve_range_impl(
        &self,
        content_hash: &str,
        range: Option<(u64, u64)>,
    ) -> EngineResult<BoxedAsyncRead> {
        let path = self.shard_path(content_hash);
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EngineError::BlobNotFound(content_hash.to_string())
            } else {
                EngineError::StorageUnavailable(e.to_string())
            }
        })?;

        match self.active_cipher() {
            None => {
                if let Some((offset, _length)) = range {
                    file.seek(std::io::SeekFrom::Start(offset))
                        .await
                        .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
                }
                let reader: BoxedAsyncRead = match range {
                    Some((_, length)) => Box::pin(file.take(length)),
                    None => Box::pin(file),
                };
                Ok(reader)
            }
            Some(cipher) => {
                let plaintext = match range {
                    Some((offset, length)) => {
                        crypto::decrypt_range(&cipher, content_hash, &mut file, offset, length)
                            .await?
                    }
                    None => crypto::decrypt_whole(&cipher, content_hash, &mut file).await?,
                };
                Ok(Box::pin(std::io::Cursor::new(plaintext)))
            }
        }
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

/// A write half used internally when constructing replies that stitch multiple readers
/// together (composite multipart reads). Re-exported for the object service.
pub type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send + Unpin>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn store_at(dir: &std::path::Path) -> FsBlobStore {
        FsBlobStore::new(
            StorageConfig::builder()
                .data_dir(dir.to_path_buf())
                .build(),
            CryptoConfig::builder().build(),
        )
    }

    #[tokio::test]
    async fn test_should_store_and_retrieve_plaintext_blob() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let store = store_at(dir.path());
        let body = b"hello world".to_vec();
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(body.clone()));
        let result = store
            .store(reader, body.len() as u64)
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));
        assert!(!result.deduplicated);

        let mut out = Vec::new();
        let mut r = store
            .retrieve(&result.content_hash)
            .await
            .unwrap_or_else(|e| panic!("retrieve failed: {e}"));
        r.read_to_end(&mut out)
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn test_should_dedup_identical_content() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let store = store_at(dir.path());
        let body = b"duplicate me".to_vec();

        let r1: BoxedAsyncRead = Box::pin(std::io::Cursor::new(body.clone()));
        let first = store
            .store(r1, body.len() as u64)
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));
        assert!(!first.deduplicated);

        let r2: BoxedAsyncRead = Box::pin(std::io::Cursor::new(body.clone()));
        let second = store
            .store(r2, body.len() as u64)
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));
        assert!(second.deduplicated);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[tokio::test]
    async fn test_should_reject_size_mismatch() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let store = store_at(dir.path());
        let body = b"short".to_vec();
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(body));
        let err = store.store(reader, 999).await.unwrap_err();
        assert!(matches!(err, EngineError::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_should_read_byte_range() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let store = store_at(dir.path());
        let body = b"0123456789".to_vec();
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(body.clone()));
        let result = store
            .store(reader, body.len() as u64)
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));

        let mut out = Vec::new();
        let mut r = store
            .retrieve_range(&result.content_hash, 3, 4)
            .await
            .unwrap_or_else(|e| panic!("retrieve_range failed: {e}"));
        r.read_to_end(&mut out)
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(out, b"3456");
    }

    #[tokio::test]
    async fn test_should_read_byte_range_from_encrypted_blob() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let store = FsBlobStore::new(
            StorageConfig::builder().data_dir(dir.path().to_path_buf()).build(),
            CryptoConfig::builder()
                .master_key(Some([9u8; 32]))
                .scheme(CryptoScheme::ChaCha20Poly1305Streaming)
                .build(),
        );
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(body.clone()));
        let result = store
            .store(reader, body.len() as u64)
            .await
            .unwrap_or_else(|e| panic!("store failed: {e}"));

        let mut out = Vec::new();
        let mut r = store
            .retrieve_range(&result.content_hash, 100, 50)
            .await
            .unwrap_or_else(|e| panic!("retrieve_range failed: {e}"));
        r.read_to_end(&mut out)
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(out, body[100..150]);

        let mut whole = Vec::new();
        let mut r = store
            .retrieve(&result.content_hash)
            .await
            .unwrap_or_else(|e| panic!("retrieve failed: {e}"));
        r.read_to_end(&mut whole)
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(whole, body);
    }

    #[tokio::test]
    async fn test_should_delete_be_idempotent() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let store = store_at(dir.path());
        store.delete("does-not-exist").await.unwrap_or_else(|e| panic!("delete failed: {e}"));
        store.delete("does-not-exist").await.unwrap_or_else(|e| panic!("delete failed: {e}"));
    }
}
