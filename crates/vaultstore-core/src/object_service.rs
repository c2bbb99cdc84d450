//! PUT/GET/HEAD/DELETE/COPY/LIST operations over objects: the service that ties
//! the Blob Store and Metadata Store together into S3-shaped object semantics.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use crate::blob::{BlobStore, BoxedAsyncRead};
use crate::error::{EngineError, EngineResult};
use crate::metadata::{ListPage, MetadataStore};
use crate::model::{BucketAcl, ObjectVersion, VersioningState};
use crate::util::ByteRange;
use crate::validation::{validate_metadata, validate_object_key};

/// Caller identity used for ownership/ACL checks. Request authentication itself
/// happens upstream of this crate; the service only needs the resolved identity.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// Numeric user id, or `None` for an anonymous caller.
    pub user_id: Option<i64>,
}

/// Result of a successful [`ObjectService::put_object`] call.
#[derive(Debug, Clone)]
pub struct PutObjectResult {
    /// ETag of the stored content.
    pub etag: String,
    /// Version id assigned, if the bucket is versioned.
    pub version_id: Option<String>,
}

/// Result of a successful [`ObjectService::get_object`] call.
pub struct GetObjectResult {
    /// Byte stream of the (possibly range-limited) content.
    pub body: BoxedAsyncRead,
    /// Number of bytes `body` will yield.
    pub content_length: u64,
    /// ETag of the object version served.
    pub etag: String,
    /// MIME content type.
    pub content_type: String,
    /// User-supplied metadata.
    pub metadata: BTreeMap<String, String>,
    /// Version id served.
    pub version_id: Option<String>,
}

/// Result of a successful [`ObjectService::delete_object`] call.
#[derive(Debug, Clone, Default)]
pub struct DeleteObjectResult {
    /// Version id of the delete marker created, if any.
    pub delete_marker_version_id: Option<String>,
}

/// Ties together the Blob Store and Metadata Store to implement object-level operations.
pub struct ObjectService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl ObjectService {
    /// Builds a service over the given backends.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    async fn resolve_bucket_for_write(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
    ) -> EngineResult<crate::model::Bucket> {
        let bucket = self
            .metadata
            .get_bucket(bucket_name)
            .await?
            .ok_or_else(|| EngineError::BucketNotFound(bucket_name.to_string()))?;
        let allowed = caller.user_id == Some(bucket.owner_id) || bucket.acl == BucketAcl::PublicReadWrite;
        if !allowed {
            return Err(EngineError::AccessDenied);
        }
        Ok(bucket)
    }

    async fn resolve_bucket_for_read(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
    ) -> EngineResult<crate::model::Bucket> {
        let bucket = self
            .metadata
            .get_bucket(bucket_name)
            .await?
            .ok_or_else(|| EngineError::BucketNotFound(bucket_name.to_string()))?;
        let allowed = caller.user_id == Some(bucket.owner_id)
            || matches!(bucket.acl, BucketAcl::PublicRead | BucketAcl::PublicReadWrite);
        if !allowed {
            return Err(EngineError::AccessDenied);
        }
        Ok(bucket)
    }

    /// Streams `body` into the content store and records a new object version.
    pub async fn put_object(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        key: &str,
        body: BoxedAsyncRead,
        declared_size: u64,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> EngineResult<PutObjectResult> {
        validate_object_key(key)?;
        validate_metadata(&metadata)?;
        let bucket = self.resolve_bucket_for_write(caller, bucket_name).await?;

        // `store` hashes both SHA-256 and MD5 in the same single pass it writes the
        // temp file with, so the body never sits fully buffered in this layer.
        let stored = self.blobs.store(body, declared_size).await?;
        let etag = stored.md5_hex.clone();

        let is_encrypted = false; // tracked by the blob store's active cipher, not per-call here
        self.metadata
            .upsert_blob_ref(&stored.content_hash, stored.size, is_encrypted, None)
            .await?;

        let outcome = self
            .metadata
            .tx_put_object(
                bucket.id,
                key,
                &stored.content_hash,
                stored.size,
                content_type,
                &etag,
                metadata,
                "STANDARD",
                bucket.versioning,
            )
            .await?;

        Ok(PutObjectResult {
            etag,
            version_id: outcome.version_id,
        })
    }

    /// Fetches an object's bytes, optionally limited to a byte range.
    pub async fn get_object(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
        range: Option<ByteRange>,
    ) -> EngineResult<GetObjectResult> {
        let bucket = self.resolve_bucket_for_read(caller, bucket_name).await?;
        let object = self
            .metadata
            .get_object(bucket.id, key, version_id)
            .await?
            .ok_or_else(|| EngineError::NoSuchKey(key.to_string()))?;

        if object.is_delete_marker {
            return Err(EngineError::NoSuchKey(key.to_string()));
        }
        let content_hash = object
            .content_hash
            .as_deref()
            .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("live object missing content hash")))?;

        let (body, content_length) = match range {
            Some(r) => (
                self.blobs.retrieve_range(content_hash, r.start, r.len()).await?,
                r.len(),
            ),
            None => (self.blobs.retrieve(content_hash).await?, object.size),
        };

        Ok(GetObjectResult {
            body,
            content_length,
            etag: object.etag.clone(),
            content_type: object.content_type.clone(),
            metadata: object.metadata.clone(),
            version_id: object.version_id.clone(),
        })
    }

    /// Fetches an object's metadata without its body.
    pub async fn head_object(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> EngineResult<ObjectVersion> {
        let bucket = self.resolve_bucket_for_read(caller, bucket_name).await?;
        let object = self
            .metadata
            .get_object(bucket.id, key, version_id)
            .await?
            .ok_or_else(|| EngineError::NoSuchKey(key.to_string()))?;
        if object.is_delete_marker {
            return Err(EngineError::NoSuchKey(key.to_string()));
        }
        Ok(object)
    }

    /// Deletes an object (or inserts a delete marker under a versioned bucket).
    pub async fn delete_object(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> EngineResult<DeleteObjectResult> {
        let bucket = self.resolve_bucket_for_write(caller, bucket_name).await?;
        let outcome = self
            .metadata
            .tx_delete_object(bucket.id, key, version_id, bucket.versioning)
            .await?;
        Ok(DeleteObjectResult {
            delete_marker_version_id: if outcome.delete_marker_created {
                outcome.version_id
            } else {
                None
            },
        })
    }

    /// Deletes a batch of keys, collecting per-key outcomes rather than failing the whole
    /// batch on the first error.
    pub async fn delete_objects(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        keys: &[String],
    ) -> Vec<(String, EngineResult<DeleteObjectResult>)> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.delete_object(caller, bucket_name, key, None).await;
            results.push((key.clone(), outcome));
        }
        results
    }

    /// Copies an object's content to a new bucket/key without re-reading its bytes.
    pub async fn copy_object(
        &self,
        caller: &CallerIdentity,
        src_bucket: &str,
        src_key: &str,
        src_version: Option<&str>,
        dst_bucket: &str,
        dst_key: &str,
        new_metadata: Option<BTreeMap<String, String>>,
    ) -> EngineResult<PutObjectResult> {
        let source_bucket = self.resolve_bucket_for_read(caller, src_bucket).await?;
        let source = self
            .metadata
            .get_object(source_bucket.id, src_key, src_version)
            .await?
            .ok_or_else(|| EngineError::NoSuchKey(src_key.to_string()))?;
        let content_hash = source
            .content_hash
            .clone()
            .ok_or_else(|| EngineError::NoSuchKey(src_key.to_string()))?;

        let dest_bucket = self.resolve_bucket_for_write(caller, dst_bucket).await?;
        self.metadata
            .upsert_blob_ref(&content_hash, source.size, false, None)
            .await?;

        let metadata = new_metadata.unwrap_or_else(|| source.metadata.clone());
        let outcome = self
            .metadata
            .tx_put_object(
                dest_bucket.id,
                dst_key,
                &content_hash,
                source.size,
                &source.content_type,
                &source.etag,
                metadata,
                &source.storage_class,
                dest_bucket.versioning,
            )
            .await?;

        Ok(PutObjectResult {
            etag: source.etag,
            version_id: outcome.version_id,
        })
    }

    /// Lists the latest, live objects under a bucket (S3 `ListObjectsV2` semantics).
    pub async fn list_objects_v2(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> EngineResult<ListPage<ObjectVersion>> {
        let bucket = self.resolve_bucket_for_read(caller, bucket_name).await?;
        self.metadata
            .list_objects_v2(bucket.id, prefix, delimiter, continuation_token, max_keys.clamp(1, 1000))
            .await
    }

    /// Lists every version (including delete markers) under a bucket.
    pub async fn list_object_versions(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        prefix: &str,
        max_keys: usize,
    ) -> EngineResult<ListPage<ObjectVersion>> {
        let bucket = self.resolve_bucket_for_read(caller, bucket_name).await?;
        self.metadata
            .list_object_versions(bucket.id, prefix, max_keys.clamp(1, 1000))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use crate::config::{CryptoConfig, StorageConfig};
    use crate::metadata::memory::InMemoryMetadataStore;
    use crate::model::BucketAcl;

    async fn new_service() -> (
        ObjectService,
        Arc<dyn MetadataStore>,
        crate::model::Bucket,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir failed: {e}"));
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(
            StorageConfig::builder().data_dir(dir.path().to_path_buf()).build(),
            CryptoConfig::builder().build(),
        ));
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let bucket = metadata
            .create_bucket(1, "bucket", "us-east-1", BucketAcl::Private)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        (ObjectService::new(blobs, metadata.clone()), metadata, bucket, dir)
    }

    #[tokio::test]
    async fn test_should_put_and_get_roundtrip() {
        let (svc, _metadata, _bucket, _dir) = new_service().await;
        let caller = CallerIdentity { user_id: Some(1) };
        let body: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"hello".to_vec()));
        let put = svc
            .put_object(&caller, "bucket", "k", body, 5, "text/plain", BTreeMap::new())
            .await
            .unwrap_or_else(|e| panic!("put failed: {e}"));
        assert_eq!(put.etag.len(), 32);

        let mut got = svc
            .get_object(&caller, "bucket", "k", None, None)
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        let mut out = Vec::new();
        got.body.read_to_end(&mut out).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_should_deny_write_from_non_owner() {
        let (svc, _metadata, _bucket, _dir) = new_service().await;
        let stranger = CallerIdentity { user_id: Some(2) };
        let body: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        let err = svc
            .put_object(&stranger, "bucket", "k", body, 1, "text/plain", BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AccessDenied));
    }

    #[tokio::test]
    async fn test_should_return_no_such_key_after_delete() {
        let (svc, _metadata, _bucket, _dir) = new_service().await;
        let caller = CallerIdentity { user_id: Some(1) };
        let body: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"bye".to_vec()));
        svc.put_object(&caller, "bucket", "k", body, 3, "text/plain", BTreeMap::new())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        svc.delete_object(&caller, "bucket", "k", None)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let err = svc.get_object(&caller, "bucket", "k", None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::NoSuchKey(_)));
    }
}
