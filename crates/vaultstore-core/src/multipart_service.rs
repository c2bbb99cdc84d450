//! Multipart upload lifecycle: Initiate / UploadPart / Complete / Abort / List.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use crate::blob::{BlobStore, BoxedAsyncRead};
use crate::checksums::compute_multipart_etag;
use crate::error::{EngineError, EngineResult};
use crate::metadata::{CompletedPart, ListPage, MetadataStore};
use crate::model::{BucketAcl, MultipartUpload, UploadPart};
use crate::object_service::CallerIdentity;
use crate::util::ByteRange;
use crate::validation::{validate_object_key, validate_part_number};

/// Minimum size for any part except the last one in a Complete call.
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Result of [`MultipartService::initiate`].
#[derive(Debug, Clone)]
pub struct InitiateResult {
    /// The new upload's id.
    pub upload_id: String,
}

/// Result of [`MultipartService::upload_part`].
#[derive(Debug, Clone)]
pub struct UploadPartResult {
    /// ETag (hex MD5) of the part's plaintext.
    pub etag: String,
}

/// A single entry in the ordered part list supplied to [`MultipartService::complete`].
#[derive(Debug, Clone)]
pub struct PartSpec {
    /// Part number as uploaded.
    pub part_number: u32,
    /// ETag the caller believes this part has.
    pub etag: String,
}

/// Result of [`MultipartService::complete`].
#[derive(Debug, Clone)]
pub struct CompleteResult {
    /// Composite ETag, `hex(md5(concat(part md5 bytes)))-N`.
    pub etag: String,
    /// Version id assigned to the final object, if the bucket is versioned.
    pub version_id: Option<String>,
}

/// Implements the multipart upload state machine over the Blob and Metadata stores.
pub struct MultipartService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl MultipartService {
    /// Builds a service over the given backends.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { blobs, metadata }
    }

    /// Starts a new multipart upload.
    pub async fn initiate(
        &self,
        caller: &CallerIdentity,
        bucket_name: &str,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> EngineResult<InitiateResult> {
        validate_object_key(key)?;
        let bucket = self
            .metadata
            .get_bucket(bucket_name)
            .await?
            .ok_or_else(|| EngineError::BucketNotFound(bucket_name.to_string()))?;
        if caller.user_id != Some(bucket.owner_id) {
            return Err(EngineError::AccessDenied);
        }
        let upload = self
            .metadata
            .initiate_multipart(bucket.id, key, content_type, metadata, "STANDARD")
            .await?;
        Ok(InitiateResult { upload_id: upload.id })
    }

    /// Uploads one part's bytes, deduplicating via the blob store like any other write.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: BoxedAsyncRead,
        declared_size: u64,
    ) -> EngineResult<UploadPartResult> {
        validate_part_number(part_number)?;
        self.ensure_in_progress(upload_id).await?;

        let stored = self.blobs.store(body, declared_size).await?;
        let etag = stored.md5_hex.clone();
        self.metadata
            .upsert_blob_ref(&stored.content_hash, stored.size, false, None)
            .await?;
        self.metadata
            .put_part(upload_id, part_number, &stored.content_hash, stored.size, &etag)
            .await?;

        Ok(UploadPartResult { etag })
    }

    /// Uploads one part sourced from an existing object's bytes rather than a request
    /// body, exactly like [`Self::upload_part`] but reading through the object store
    /// first (S3's `UploadPartCopy`).
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_part_copy(
        &self,
        caller: &CallerIdentity,
        upload_id: &str,
        part_number: u32,
        src_bucket: &str,
        src_key: &str,
        src_version: Option<&str>,
        byte_range: Option<ByteRange>,
    ) -> EngineResult<UploadPartResult> {
        validate_part_number(part_number)?;
        self.ensure_in_progress(upload_id).await?;

        let bucket = self.resolve_bucket_for_read(caller, src_bucket).await?;
        let source = self
            .metadata
            .get_object(bucket.id, src_key, src_version)
            .await?
            .ok_or_else(|| EngineError::NoSuchKey(src_key.to_string()))?;
        if source.is_delete_marker {
            return Err(EngineError::NoSuchKey(src_key.to_string()));
        }
        let content_hash = source
            .content_hash
            .clone()
            .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("live object missing content hash")))?;

        let (reader, size) = match byte_range {
            Some(r) => (
                self.blobs.retrieve_range(&content_hash, r.start, r.len()).await?,
                r.len(),
            ),
            None => (self.blobs.retrieve(&content_hash).await?, source.size),
        };

        let stored = self.blobs.store(reader, size).await?;
        let etag = stored.md5_hex.clone();
        self.metadata
            .upsert_blob_ref(&stored.content_hash, stored.size, false, None)
            .await?;
        self.metadata
            .put_part(upload_id, part_number, &stored.content_hash, stored.size, &etag)
            .await?;

        Ok(UploadPartResult { etag })
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

    async fn ensure_in_progress(&self, upload_id: &str) -> EngineResult<MultipartUpload> {
        let upload = self
            .metadata
            .get_multipart(upload_id)
            .await?
            .ok_or_else(|| EngineError::NoSuchUpload(upload_id.to_string()))?;
        if upload.status != crate::model::MultipartStatus::InProgress {
            return Err(EngineError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(upload)
    }

    fn validate_part_order_and_sizes(ordered: &[PartSpec], stored: &[UploadPart]) -> EngineResult<()> {
        let by_number: std::collections::HashMap<u32, &UploadPart> =
            stored.iter().map(|p| (p.part_number, p)).collect();

        let mut last_number = 0u32;
        for (idx, spec) in ordered.iter().enumerate() {
            if spec.part_number <= last_number {
                return Err(EngineError::InvalidPartOrder(spec.part_number));
            }
            last_number = spec.part_number;

            let Some(stored_part) = by_number.get(&spec.part_number) else {
                return Err(EngineError::InvalidPart(format!(
                    "part {} was never uploaded",
                    spec.part_number
                )));
            };
            if stored_part.etag != spec.etag {
                return Err(EngineError::InvalidPart(format!(
                    "part {} etag mismatch",
                    spec.part_number
                )));
            }

            let is_last = idx == ordered.len() - 1;
            if !is_last && stored_part.size < MIN_PART_SIZE {
                return Err(EngineError::EntityTooSmall {
                    part_number: spec.part_number,
                    size: stored_part.size,
                    minimum: MIN_PART_SIZE,
                });
            }
        }
        Ok(())
    }

    /// Validates and assembles the parts into a final object, materializing a fresh
    /// concatenated blob (the composite-blob strategy chosen for this engine; see
    /// `DESIGN.md` for the rationale).
    pub async fn complete(&self, upload_id: &str, ordered: Vec<PartSpec>) -> EngineResult<CompleteResult> {
        let upload = self.ensure_in_progress(upload_id).await?;
        let stored_parts = self.metadata.list_parts(upload_id, None, 10_000).await?.items;
        Self::validate_part_order_and_sizes(&ordered, &stored_parts)?;

        let stored_by_number: std::collections::HashMap<u32, &UploadPart> =
            stored_parts.iter().map(|p| (p.part_number, p)).collect();

        let mut composite = Vec::new();
        let mut part_md5_hex = Vec::with_capacity(ordered.len());
        for spec in &ordered {
            let part = stored_by_number[&spec.part_number];
            let mut reader = self.blobs.retrieve(&part.content_hash).await?;
            reader
                .read_to_end(&mut composite)
                .await
                .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;
            part_md5_hex.push(part.etag.clone());
        }
        let composite_etag = compute_multipart_etag(&part_md5_hex);
        let composite_size = composite.len() as u64;

        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(composite));
        let stored = self.blobs.store(reader, composite_size).await?;
        self.metadata
            .upsert_blob_ref(&stored.content_hash, stored.size, false, None)
            .await?;

        let bucket = self
            .metadata
            .get_bucket_by_id(upload.bucket_id)
            .await?
            .ok_or_else(|| EngineError::BucketNotFound(upload.bucket_id.to_string()))?;

        let completed_parts: Vec<CompletedPart> = ordered
            .iter()
            .map(|p| CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        let object = self
            .metadata
            .tx_complete_multipart(
                upload_id,
                &completed_parts,
                &stored.content_hash,
                stored.size,
                &composite_etag,
                bucket.versioning,
            )
            .await?;

        Ok(CompleteResult {
            etag: composite_etag,
            version_id: object.version_id,
        })
    }

    /// Releases all parts of an in-progress upload.
    pub async fn abort(&self, upload_id: &str) -> EngineResult<()> {
        self.metadata.abort_multipart(upload_id).await
    }

    /// Lists uploaded parts for an upload, ordered by part number, paginated like
    /// `ListObjectsV2` via an opaque continuation token.
    pub async fn list_parts(
        &self,
        upload_id: &str,
        continuation_token: Option<&str>,
        max_parts: usize,
    ) -> EngineResult<ListPage<UploadPart>> {
        self.metadata
            .list_parts(upload_id, continuation_token, max_parts.clamp(1, 10_000))
            .await
    }

    /// Lists in-progress uploads for a bucket, paginated like `ListObjectsV2`.
    pub async fn list_uploads(
        &self,
        bucket_id: i64,
        continuation_token: Option<&str>,
        max_uploads: usize,
    ) -> EngineResult<ListPage<MultipartUpload>> {
        self.metadata
            .list_multipart_uploads(bucket_id, continuation_token, max_uploads.clamp(1, 1000))
            .await
    }
}
