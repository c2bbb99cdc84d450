//! ACID metadata store contract: buckets, objects/versions, blobs (ref-counted),
//! multipart uploads/parts, lifecycle rules, and blob locations.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use crate::model::{
    Bucket, BucketAcl, BlobLocation, BlobRecord, LifecycleRule, MultipartUpload, ObjectVersion,
    UploadPart, VersioningState,
};

/// Outcome of [`MetadataStore::tx_put_object`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// The version id assigned to the new row (`None` under Disabled/Suspended).
    pub version_id: Option<String>,
    /// The content hash the new row superseded, if any blob ref needs decrementing.
    pub prior_hash_to_deref: Option<String>,
}

/// Outcome of [`MetadataStore::tx_delete_object`].
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// Whether a delete marker was inserted (versioned bucket, no explicit version_id).
    pub delete_marker_created: bool,
    /// The version id affected (new marker, or the version hard-deleted).
    pub version_id: Option<String>,
    /// The content hash that lost a reference, if any.
    pub hash_to_deref: Option<String>,
}

/// A page of listing results with an optional continuation cursor.
#[derive(Debug, Clone, Default)]
pub struct ListPage<T> {
    /// Items in this page.
    pub items: Vec<T>,
    /// Common prefixes collapsed by a delimiter (object listings only).
    pub common_prefixes: Vec<String>,
    /// Opaque token to pass back in for the next page; `None` if this is the last page.
    pub next_continuation_token: Option<String>,
}

/// One part reference supplied to [`MetadataStore::tx_complete_multipart`].
#[derive(Debug, Clone)]
pub struct CompletedPart {
    /// Part number as uploaded.
    pub part_number: u32,
    /// ETag the caller expects to match the stored part.
    pub etag: String,
}

/// The ACID metadata store contract.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // -- Buckets -----------------------------------------------------------
    /// Creates a new bucket; fails if the name is already taken.
    async fn create_bucket(
        &self,
        owner_id: i64,
        name: &str,
        region: &str,
        acl: BucketAcl,
    ) -> EngineResult<Bucket>;

    /// Looks up a bucket by name.
    async fn get_bucket(&self, name: &str) -> EngineResult<Option<Bucket>>;

    /// Looks up a bucket by its surrogate id.
    async fn get_bucket_by_id(&self, id: i64) -> EngineResult<Option<Bucket>>;

    /// Deletes a bucket; fails if it still contains any live object row.
    async fn delete_bucket(&self, name: &str) -> EngineResult<()>;

    /// Updates a bucket's versioning state, enforcing the one-way Enabled→Suspended rule.
    async fn set_bucket_versioning(&self, bucket_id: i64, next: VersioningState) -> EngineResult<()>;

    // -- Objects -------------------------------------------------------------
    /// Inserts or updates the latest row for `(bucket_id, key)` per the bucket's
    /// versioning mode, bumping the new blob's ref_count and returning any prior
    /// hash that should be dereferenced.
    #[allow(clippy::too_many_arguments)]
    async fn tx_put_object(
        &self,
        bucket_id: i64,
        key: &str,
        content_hash: &str,
        size: u64,
        content_type: &str,
        etag: &str,
        metadata: BTreeMap<String, String>,
        storage_class: &str,
        versioning: VersioningState,
    ) -> EngineResult<PutOutcome>;

    /// Deletes an object per the bucket's versioning mode and the optional explicit version.
    async fn tx_delete_object(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: Option<&str>,
        versioning: VersioningState,
    ) -> EngineResult<DeleteOutcome>;

    /// Fetches a specific version, or the current latest if `version_id` is `None`.
    async fn get_object(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: Option<&str>,
    ) -> EngineResult<Option<ObjectVersion>>;

    /// Lists latest, live objects under `bucket_id`.
    async fn list_objects_v2(
        &self,
        bucket_id: i64,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> EngineResult<ListPage<ObjectVersion>>;

    /// Lists every version (including delete markers) under `bucket_id`.
    async fn list_object_versions(
        &self,
        bucket_id: i64,
        prefix: &str,
        max_keys: usize,
    ) -> EngineResult<ListPage<ObjectVersion>>;

    // -- Blobs -----------------------------------------------------------------
    /// Fetches a blob's metadata row.
    async fn get_blob(&self, content_hash: &str) -> EngineResult<Option<BlobRecord>>;

    /// Inserts a blob row with ref_count=1, or increments ref_count if it already exists.
    async fn upsert_blob_ref(
        &self,
        content_hash: &str,
        size: u64,
        is_encrypted: bool,
        encryption_scheme: Option<&str>,
    ) -> EngineResult<()>;

    /// Decrements a blob's ref_count; starts its grace-period clock if it hits zero.
    async fn deref_blob(&self, content_hash: &str) -> EngineResult<()>;

    /// Lists blobs with `ref_count = 0` whose `last_referenced_at` is older than `older_than`.
    async fn list_zero_ref_blobs(&self, older_than: DateTime<Utc>, limit: usize) -> EngineResult<Vec<BlobRecord>>;

    /// Removes a blob's metadata row (the caller is responsible for the on-disk file).
    async fn remove_blob_record(&self, content_hash: &str) -> EngineResult<()>;

    // -- Multipart ---------------------------------------------------------------
    /// Starts a new multipart upload and returns its id.
    async fn initiate_multipart(
        &self,
        bucket_id: i64,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
        storage_class: &str,
    ) -> EngineResult<MultipartUpload>;

    /// Fetches an in-progress, completed, or aborted upload.
    async fn get_multipart(&self, upload_id: &str) -> EngineResult<Option<MultipartUpload>>;

    /// Records (or replaces) one uploaded part, adjusting blob ref counts accordingly.
    async fn put_part(
        &self,
        upload_id: &str,
        part_number: u32,
        content_hash: &str,
        size: u64,
        etag: &str,
    ) -> EngineResult<()>;

    /// Lists parts for an upload, ordered by part number, starting after `continuation_token`
    /// (the part number of the last item in the previous page) if given.
    async fn list_parts(
        &self,
        upload_id: &str,
        continuation_token: Option<&str>,
        max_parts: usize,
    ) -> EngineResult<ListPage<UploadPart>>;

    /// Validates and assembles the final object, marking the upload completed.
    async fn tx_complete_multipart(
        &self,
        upload_id: &str,
        ordered_parts: &[CompletedPart],
        composite_hash: &str,
        composite_size: u64,
        composite_etag: &str,
        versioning: VersioningState,
    ) -> EngineResult<ObjectVersion>;

    /// Releases all parts of an in-progress upload and marks it aborted.
    async fn abort_multipart(&self, upload_id: &str) -> EngineResult<()>;

    /// Lists in-progress uploads for a bucket, ordered by key then upload id, starting
    /// after `continuation_token` (an opaque key+upload_id marker) if given.
    async fn list_multipart_uploads(
        &self,
        bucket_id: i64,
        continuation_token: Option<&str>,
        max_uploads: usize,
    ) -> EngineResult<ListPage<MultipartUpload>>;

    // -- Lifecycle -----------------------------------------------------------------
    /// Inserts a lifecycle rule.
    async fn put_lifecycle_rule(&self, rule: LifecycleRule) -> EngineResult<()>;

    /// Lists all lifecycle rules across all buckets (used by the expiration pass).
    async fn list_lifecycle_rules(&self) -> EngineResult<Vec<LifecycleRule>>;

    // -- Cluster (blob locations) ----------------------------------------------------
    /// Registers that `node_id` now holds a copy of `content_hash`.
    async fn put_blob_location(&self, location: BlobLocation) -> EngineResult<()>;

    /// Lists every node known to hold a copy of `content_hash`.
    async fn list_blob_locations(&self, content_hash: &str) -> EngineResult<Vec<BlobLocation>>;

    /// Removes a node's record of holding `content_hash`.
    async fn remove_blob_location(&self, content_hash: &str, node_id: &str) -> EngineResult<()>;
}
