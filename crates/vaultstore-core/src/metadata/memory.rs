//! In-memory `MetadataStore` implementation. Durability is out of scope for this
//! core engine (see module docs); this backend gives the rest of the engine a
//! fully functional store to run against and to exercise in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Bucket, BucketAcl, BlobLocation, BlobRecord, LifecycleRule, MultipartStatus, MultipartUpload,
    ObjectVersion, UploadPart, VersioningState,
};
use crate::util::{generate_upload_id, generate_version_id};

use super::{CompletedPart, DeleteOutcome, ListPage, MetadataStore, PutOutcome};

#[derive(Default)]
struct Tables {
    next_bucket_id: i64,
    buckets: HashMap<i64, Bucket>,
    bucket_names: HashMap<String, i64>,

    next_object_id: i64,
    objects: HashMap<i64, ObjectVersion>,
    /// (bucket_id, key) -> object ids, insertion order == creation order.
    objects_by_key: HashMap<(i64, String), Vec<i64>>,

    blobs: HashMap<String, BlobRecord>,

    uploads: HashMap<String, MultipartUpload>,
    parts: HashMap<String, BTreeMap<u32, UploadPart>>,

    lifecycle_rules: Vec<LifecycleRule>,
    next_lifecycle_id: i64,

    blob_locations: HashMap<String, Vec<BlobLocation>>,
}

/// `DashMap`/`parking_lot`-style in-memory store: a single mutex over all tables.
/// Every critical section here is pure CPU work with no `.await`, so holding the
/// lock across the whole operation is both correct and cheap.
#[derive(Debug)]
pub struct InMemoryMetadataStore {
    tables: Mutex<Tables>,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

fn drop_ref(tables: &mut Tables, content_hash: &str) {
    let now = Utc::now();
    if let Some(blob) = tables.blobs.get_mut(content_hash) {
        blob.ref_count = (blob.ref_count - 1).max(0);
        blob.last_referenced_at = now;
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create_bucket(
        &self,
        owner_id: i64,
        name: &str,
        region: &str,
        acl: BucketAcl,
    ) -> EngineResult<Bucket> {
        let mut tables = self.tables.lock();
        if tables.bucket_names.contains_key(name) {
            return Err(EngineError::BucketAlreadyExists(name.to_string()));
        }
        tables.next_bucket_id += 1;
        let id = tables.next_bucket_id;
        let bucket = Bucket {
            id,
            owner_id,
            name: name.to_string(),
            region: region.to_string(),
            versioning: VersioningState::Disabled,
            acl,
            object_lock: false,
            created_at: Utc::now(),
        };
        tables.buckets.insert(id, bucket.clone());
        tables.bucket_names.insert(name.to_string(), id);
        Ok(bucket)
    }

    async fn get_bucket(&self, name: &str) -> EngineResult<Option<Bucket>> {
        let tables = self.tables.lock();
        Ok(tables
            .bucket_names
            .get(name)
            .and_then(|id| tables.buckets.get(id))
            .cloned())
    }

    async fn get_bucket_by_id(&self, id: i64) -> EngineResult<Option<Bucket>> {
        Ok(self.tables.lock().buckets.get(&id).cloned())
    }

    async fn delete_bucket(&self, name: &str) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        let Some(&id) = tables.bucket_names.get(name) else {
            return Err(EngineError::BucketNotFound(name.to_string()));
        };
        let has_live_objects = tables.objects_by_key.iter().any(|((bucket_id, _), ids)| {
            *bucket_id == id
                && ids
                    .iter()
                    .filter_map(|oid| tables.objects.get(oid))
                    .any(|o| o.is_live_content() && o.is_latest)
        });
        if has_live_objects {
            return Err(EngineError::BucketNotEmpty(name.to_string()));
        }
        tables.buckets.remove(&id);
        tables.bucket_names.remove(name);
        Ok(())
    }

    async fn set_bucket_versioning(&self, bucket_id: i64, next: VersioningState) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        let Some(bucket) = tables.buckets.get_mut(&bucket_id) else {
            return Err(EngineError::BucketNotFound(bucket_id.to_string()));
        };
        if !bucket.versioning.can_transition_to(next) {
            return Err(EngineError::InvalidArgument(
                "versioning cannot move from Enabled back to Disabled".into(),
            ));
        }
        bucket.versioning = next;
        Ok(())
    }

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
    ) -> EngineResult<PutOutcome> {
        let mut tables = self.tables.lock();
        let now = Utc::now();

        let ids = tables
            .objects_by_key
            .entry((bucket_id, key.to_string()))
            .or_default()
            .clone();
        let current_latest_id = ids
            .iter()
            .rev()
            .copied()
            .find(|id| tables.objects.get(id).is_some_and(|o| o.is_latest && o.deleted_at.is_none()));

        let mut prior_hash_to_deref = None;

        let outcome = match versioning {
            VersioningState::Enabled => {
                if let Some(prev_id) = current_latest_id {
                    if let Some(prev) = tables.objects.get_mut(&prev_id) {
                        prev.is_latest = false;
                    }
                }
                tables.next_object_id += 1;
                let id = tables.next_object_id;
                let version_id = generate_version_id();
                let row = ObjectVersion {
                    id,
                    bucket_id,
                    key: key.to_string(),
                    version_id: Some(version_id.clone()),
                    is_latest: true,
                    is_delete_marker: false,
                    content_hash: Some(content_hash.to_string()),
                    size,
                    content_type: content_type.to_string(),
                    etag: etag.to_string(),
                    storage_class: storage_class.to_string(),
                    metadata,
                    created_at: now,
                    deleted_at: None,
                };
                tables.objects.insert(id, row);
                tables
                    .objects_by_key
                    .get_mut(&(bucket_id, key.to_string()))
                    .unwrap_or(&mut Vec::new())
                    .push(id);
                PutOutcome {
                    version_id: Some(version_id),
                    prior_hash_to_deref: None,
                }
            }
            VersioningState::Disabled | VersioningState::Suspended => {
                if let Some(prev_id) = current_latest_id {
                    let prev = tables.objects.get_mut(&prev_id).expect("just looked up");
                    prior_hash_to_deref = prev.content_hash.clone();
                    prev.content_hash = Some(content_hash.to_string());
                    prev.size = size;
                    prev.content_type = content_type.to_string();
                    prev.etag = etag.to_string();
                    prev.storage_class = storage_class.to_string();
                    prev.metadata = metadata;
                    prev.created_at = now;
                    prev.is_delete_marker = false;
                } else {
                    tables.next_object_id += 1;
                    let id = tables.next_object_id;
                    // Disabled and Suspended both use the `None` sentinel version id here.
                    let row = ObjectVersion {
                        id,
                        bucket_id,
                        key: key.to_string(),
                        version_id: None,
                        is_latest: true,
                        is_delete_marker: false,
                        content_hash: Some(content_hash.to_string()),
                        size,
                        content_type: content_type.to_string(),
                        etag: etag.to_string(),
                        storage_class: storage_class.to_string(),
                        metadata,
                        created_at: now,
                        deleted_at: None,
                    };
                    tables.objects.insert(id, row);
                    tables
                        .objects_by_key
                        .get_mut(&(bucket_id, key.to_string()))
                        .unwrap_or(&mut Vec::new())
                        .push(id);
                }
                PutOutcome {
                    version_id: None,
                    prior_hash_to_deref: prior_hash_to_deref.clone(),
                }
            }
        };

        if let Some(ref hash) = prior_hash_to_deref {
            drop_ref(&mut tables, hash);
        }

        Ok(outcome)
    }

    async fn tx_delete_object(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: Option<&str>,
        versioning: VersioningState,
    ) -> EngineResult<DeleteOutcome> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        let Some(ids) = tables.objects_by_key.get(&(bucket_id, key.to_string())).cloned() else {
            return Err(EngineError::NoSuchKey(key.to_string()));
        };

        if let Some(target_version) = version_id {
            let Some(&id) = ids.iter().find(|id| {
                tables
                    .objects
                    .get(id)
                    .is_some_and(|o| o.version_id.as_deref() == Some(target_version))
            }) else {
                return Err(EngineError::NoSuchKey(key.to_string()));
            };
            let removed = tables.objects.remove(&id).expect("just located");
            let was_latest = removed.is_latest;
            let hash_to_deref = removed.content_hash.clone();

            if was_latest {
                if let Some(&promote_id) = ids.iter().rev().filter(|i| **i != id).find(|i| tables.objects.contains_key(i)) {
                    if let Some(promoted) = tables.objects.get_mut(&promote_id) {
                        promoted.is_latest = true;
                    }
                }
            }

            if let Some(ref hash) = hash_to_deref {
                drop_ref(&mut tables, hash);
            }

            return Ok(DeleteOutcome {
                delete_marker_created: false,
                version_id: Some(target_version.to_string()),
                hash_to_deref,
            });
        }

        match versioning {
            VersioningState::Enabled => {
                if let Some(&prev_id) = ids.last() {
                    if let Some(prev) = tables.objects.get_mut(&prev_id) {
                        prev.is_latest = false;
                    }
                }
                tables.next_object_id += 1;
                let id = tables.next_object_id;
                let version_id = generate_version_id();
                let row = ObjectVersion {
                    id,
                    bucket_id,
                    key: key.to_string(),
                    version_id: Some(version_id.clone()),
                    is_latest: true,
                    is_delete_marker: true,
                    content_hash: None,
                    size: 0,
                    content_type: String::new(),
                    etag: String::new(),
                    storage_class: String::new(),
                    metadata: BTreeMap::new(),
                    created_at: now,
                    deleted_at: None,
                };
                tables.objects.insert(id, row);
                tables
                    .objects_by_key
                    .get_mut(&(bucket_id, key.to_string()))
                    .expect("key present")
                    .push(id);
                Ok(DeleteOutcome {
                    delete_marker_created: true,
                    version_id: Some(version_id),
                    hash_to_deref: None,
                })
            }
            VersioningState::Disabled | VersioningState::Suspended => {
                let Some(&id) = ids.iter().rev().find(|id| {
                    tables.objects.get(id).is_some_and(|o| o.is_latest && o.deleted_at.is_none())
                }) else {
                    return Err(EngineError::NoSuchKey(key.to_string()));
                };
                let hash_to_deref = {
                    let obj = tables.objects.get_mut(&id).expect("just located");
                    obj.deleted_at = Some(now);
                    obj.content_hash.clone()
                };
                if let Some(ref hash) = hash_to_deref {
                    drop_ref(&mut tables, hash);
                }
                Ok(DeleteOutcome {
                    delete_marker_created: false,
                    version_id: None,
                    hash_to_deref,
                })
            }
        }
    }

    async fn get_object(
        &self,
        bucket_id: i64,
        key: &str,
        version_id: Option<&str>,
    ) -> EngineResult<Option<ObjectVersion>> {
        let tables = self.tables.lock();
        let Some(ids) = tables.objects_by_key.get(&(bucket_id, key.to_string())) else {
            return Ok(None);
        };
        let found = match version_id {
            Some(v) => ids
                .iter()
                .filter_map(|id| tables.objects.get(id))
                .find(|o| o.version_id.as_deref() == Some(v)),
            None => ids
                .iter()
                .filter_map(|id| tables.objects.get(id))
                .find(|o| o.is_latest && o.deleted_at.is_none()),
        };
        Ok(found.cloned())
    }

    async fn list_objects_v2(
        &self,
        bucket_id: i64,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> EngineResult<ListPage<ObjectVersion>> {
        let tables = self.tables.lock();
        let mut live: Vec<ObjectVersion> = tables
            .objects
            .values()
            .filter(|o| {
                o.bucket_id == bucket_id
                    && o.is_latest
                    && o.deleted_at.is_none()
                    && !o.is_delete_marker
                    && o.key.starts_with(prefix)
            })
            .cloned()
            .collect();
        live.sort_by(|a, b| a.key.cmp(&b.key));

        if let Some(token) = continuation_token {
            let start_after = crate::util::decode_continuation_token(token)?;
            live.retain(|o| o.key.as_str() > start_after.as_str());
        }

        let mut items = Vec::new();
        let mut common_prefixes = std::collections::BTreeSet::new();
        for obj in live {
            if let Some(delim) = delimiter {
                let rest = &obj.key[prefix.len()..];
                if let Some(idx) = rest.find(delim) {
                    let cp = format!("{prefix}{}", &rest[..idx + delim.len()]);
                    common_prefixes.insert(cp);
                    continue;
                }
            }
            items.push(obj);
            if items.len() >= max_keys {
                break;
            }
        }

        let next_token = items.last().map(|o| crate::util::encode_continuation_token(&o.key));
        let truncated = items.len() >= max_keys;

        Ok(ListPage {
            items,
            common_prefixes: common_prefixes.into_iter().collect(),
            next_continuation_token: if truncated { next_token } else { None },
        })
    }

    async fn list_object_versions(
        &self,
        bucket_id: i64,
        prefix: &str,
        max_keys: usize,
    ) -> EngineResult<ListPage<ObjectVersion>> {
        let tables = self.tables.lock();
        let mut all: Vec<ObjectVersion> = tables
            .objects
            .values()
            .filter(|o| o.bucket_id == bucket_id && o.key.starts_with(prefix) && o.deleted_at.is_none())
            .cloned()
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key).then(b.created_at.cmp(&a.created_at)));
        all.truncate(max_keys);
        Ok(ListPage {
            items: all,
            common_prefixes: Vec::new(),
            next_continuation_token: None,
        })
    }

    async fn get_blob(&self, content_hash: &str) -> EngineResult<Option<BlobRecord>> {
        Ok(self.tables.lock().blobs.get(content_hash).cloned())
    }

    async fn upsert_blob_ref(
        &self,
        content_hash: &str,
        size: u64,
        is_encrypted: bool,
        encryption_scheme: Option<&str>,
    ) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        let now = Utc::now();
        tables
            .blobs
            .entry(content_hash.to_string())
            .and_modify(|b| {
                b.ref_count += 1;
                b.last_referenced_at = now;
            })
            .or_insert_with(|| BlobRecord {
                content_hash: content_hash.to_string(),
                size,
                ref_count: 1,
                is_encrypted,
                encryption_scheme: encryption_scheme.map(str::to_string),
                created_at: now,
                last_referenced_at: now,
            });
        Ok(())
    }

    async fn deref_blob(&self, content_hash: &str) -> EngineResult<()> {
        drop_ref(&mut self.tables.lock(), content_hash);
        Ok(())
    }

    async fn list_zero_ref_blobs(
        &self,
        older_than: chrono::DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<BlobRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .blobs
            .values()
            .filter(|b| b.ref_count == 0 && b.last_referenced_at < older_than)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn remove_blob_record(&self, content_hash: &str) -> EngineResult<()> {
        self.tables.lock().blobs.remove(content_hash);
        Ok(())
    }

    async fn initiate_multipart(
        &self,
        bucket_id: i64,
        key: &str,
        content_type: &str,
        metadata: BTreeMap<String, String>,
        storage_class: &str,
    ) -> EngineResult<MultipartUpload> {
        let mut tables = self.tables.lock();
        let id = generate_upload_id();
        let upload = MultipartUpload {
            id: id.clone(),
            bucket_id,
            key: key.to_string(),
            initiated_at: Utc::now(),
            status: MultipartStatus::InProgress,
            content_type: content_type.to_string(),
            metadata,
            storage_class: storage_class.to_string(),
        };
        tables.uploads.insert(id, upload.clone());
        Ok(upload)
    }

    async fn get_multipart(&self, upload_id: &str) -> EngineResult<Option<MultipartUpload>> {
        Ok(self.tables.lock().uploads.get(upload_id).cloned())
    }

    async fn put_part(
        &self,
        upload_id: &str,
        part_number: u32,
        content_hash: &str,
        size: u64,
        etag: &str,
    ) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        if !tables
            .uploads
            .get(upload_id)
            .is_some_and(|u| u.status == MultipartStatus::InProgress)
        {
            return Err(EngineError::NoSuchUpload(upload_id.to_string()));
        }
        let prior = tables
            .parts
            .entry(upload_id.to_string())
            .or_default()
            .insert(
                part_number,
                UploadPart {
                    upload_id: upload_id.to_string(),
                    part_number,
                    size,
                    etag: etag.to_string(),
                    content_hash: content_hash.to_string(),
                    uploaded_at: Utc::now(),
                },
            );
        if let Some(prior_part) = prior {
            drop_ref(&mut tables, &prior_part.content_hash);
        }
        Ok(())
    }

    async fn list_parts(
        &self,
        upload_id: &str,
        continuation_token: Option<&str>,
        max_parts: usize,
    ) -> EngineResult<ListPage<UploadPart>> {
        let mut all: Vec<UploadPart> = self
            .tables
            .lock()
            .parts
            .get(upload_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by_key(|p| p.part_number);

        if let Some(token) = continuation_token {
            let after: u32 = crate::util::decode_continuation_token(token)?
                .parse()
                .map_err(|_| EngineError::InvalidArgument("invalid continuation token".into()))?;
            all.retain(|p| p.part_number > after);
        }

        let truncated = all.len() > max_parts;
        all.truncate(max_parts);
        let next_continuation_token = if truncated {
            all.last()
                .map(|p| crate::util::encode_continuation_token(&p.part_number.to_string()))
        } else {
            None
        };

        Ok(ListPage {
            items: all,
            common_prefixes: Vec::new(),
            next_continuation_token,
        })
    }

    async fn tx_complete_multipart(
        &self,
        upload_id: &str,
        ordered_parts: &[CompletedPart],
        composite_hash: &str,
        composite_size: u64,
        composite_etag: &str,
        versioning: VersioningState,
    ) -> EngineResult<ObjectVersion> {
        let (bucket_id, key, content_type, metadata, storage_class, part_hashes) = {
            let mut tables = self.tables.lock();
            let Some(upload) = tables.uploads.get(upload_id).cloned() else {
                return Err(EngineError::NoSuchUpload(upload_id.to_string()));
            };
            if upload.status != MultipartStatus::InProgress {
                return Err(EngineError::NoSuchUpload(upload_id.to_string()));
            }
            let stored_parts = tables.parts.get(upload_id).cloned().unwrap_or_default();
            let mut part_hashes = Vec::new();
            for cp in ordered_parts {
                let Some(stored) = stored_parts.get(&cp.part_number) else {
                    return Err(EngineError::InvalidPart(format!(
                        "part {} was never uploaded",
                        cp.part_number
                    )));
                };
                if stored.etag != cp.etag {
                    return Err(EngineError::InvalidPart(format!(
                        "part {} etag mismatch",
                        cp.part_number
                    )));
                }
                part_hashes.push(stored.content_hash.clone());
            }
            if let Some(upload_mut) = tables.uploads.get_mut(upload_id) {
                upload_mut.status = MultipartStatus::Completed;
            }
            (
                upload.bucket_id,
                upload.key.clone(),
                upload.content_type.clone(),
                upload.metadata.clone(),
                upload.storage_class.clone(),
                part_hashes,
            )
        };

        let outcome = self
            .tx_put_object(
                bucket_id,
                &key,
                composite_hash,
                composite_size,
                &content_type,
                composite_etag,
                metadata,
                &storage_class,
                versioning,
            )
            .await?;

        let mut tables = self.tables.lock();
        for hash in &part_hashes {
            drop_ref(&mut tables, hash);
        }
        tables.parts.remove(upload_id);
        drop(tables);

        self.get_object(bucket_id, &key, outcome.version_id.as_deref())
            .await?
            .ok_or_else(|| EngineError::Internal(anyhow::anyhow!("composite object vanished after insert")))
    }

    async fn abort_multipart(&self, upload_id: &str) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        let Some(upload) = tables.uploads.get_mut(upload_id) else {
            return Err(EngineError::NoSuchUpload(upload_id.to_string()));
        };
        if upload.status == MultipartStatus::Completed {
            return Err(EngineError::InvalidArgument(
                "cannot abort a completed upload".into(),
            ));
        }
        upload.status = MultipartStatus::Aborted;
        if let Some(parts) = tables.parts.remove(upload_id) {
            for part in parts.into_values() {
                drop_ref(&mut tables, &part.content_hash);
            }
        }
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        bucket_id: i64,
        continuation_token: Option<&str>,
        max_uploads: usize,
    ) -> EngineResult<ListPage<MultipartUpload>> {
        let mut all: Vec<MultipartUpload> = self
            .tables
            .lock()
            .uploads
            .values()
            .filter(|u| u.bucket_id == bucket_id && u.status == MultipartStatus::InProgress)
            .cloned()
            .collect();
        all.sort_by(|a, b| (a.key.as_str(), a.id.as_str()).cmp(&(b.key.as_str(), b.id.as_str())));

        if let Some(token) = continuation_token {
            let marker = crate::util::decode_continuation_token(token)?;
            let (marker_key, marker_id) = marker
                .split_once('\0')
                .ok_or_else(|| EngineError::InvalidArgument("invalid continuation token".into()))?;
            all.retain(|u| (u.key.as_str(), u.id.as_str()) > (marker_key, marker_id));
        }

        let truncated = all.len() > max_uploads;
        all.truncate(max_uploads);
        let next_continuation_token = if truncated {
            all.last()
                .map(|u| crate::util::encode_continuation_token(&format!("{}\0{}", u.key, u.id)))
        } else {
            None
        };

        Ok(ListPage {
            items: all,
            common_prefixes: Vec::new(),
            next_continuation_token,
        })
    }

    async fn put_lifecycle_rule(&self, mut rule: LifecycleRule) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        tables.next_lifecycle_id += 1;
        rule.id = tables.next_lifecycle_id;
        tables.lifecycle_rules.push(rule);
        Ok(())
    }

    async fn list_lifecycle_rules(&self) -> EngineResult<Vec<LifecycleRule>> {
        Ok(self.tables.lock().lifecycle_rules.clone())
    }

    async fn put_blob_location(&self, location: BlobLocation) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        let entries = tables.blob_locations.entry(location.content_hash.clone()).or_default();
        entries.retain(|l| l.node_id != location.node_id);
        entries.push(location);
        Ok(())
    }

    async fn list_blob_locations(&self, content_hash: &str) -> EngineResult<Vec<BlobLocation>> {
        Ok(self
            .tables
            .lock()
            .blob_locations
            .get(content_hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_blob_location(&self, content_hash: &str, node_id: &str) -> EngineResult<()> {
        let mut tables = self.tables.lock();
        if let Some(entries) = tables.blob_locations.get_mut(content_hash) {
            entries.retain(|l| l.node_id != node_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_bucket(store: &InMemoryMetadataStore) -> Bucket {
        store
            .create_bucket(1, "test-bucket", "us-east-1", BucketAcl::Private)
            .await
            .unwrap_or_else(|e| panic!("create_bucket failed: {e}"))
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_bucket_name() {
        let store = InMemoryMetadataStore::new();
        new_bucket(&store).await;
        let err = store
            .create_bucket(1, "test-bucket", "us-east-1", BucketAcl::Private)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BucketAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_should_version_overwrite_and_keep_old_version_readable() {
        let store = InMemoryMetadataStore::new();
        let bucket = new_bucket(&store).await;
        store
            .set_bucket_versioning(bucket.id, VersioningState::Enabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        store.upsert_blob_ref("hash-a", 1, false, None).await.unwrap_or_else(|e| panic!("{e}"));
        let p1 = store
            .tx_put_object(
                bucket.id,
                "x",
                "hash-a",
                1,
                "text/plain",
                "etag-a",
                BTreeMap::new(),
                "STANDARD",
                VersioningState::Enabled,
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        store.upsert_blob_ref("hash-b", 1, false, None).await.unwrap_or_else(|e| panic!("{e}"));
        let p2 = store
            .tx_put_object(
                bucket.id,
                "x",
                "hash-b",
                1,
                "text/plain",
                "etag-b",
                BTreeMap::new(),
                "STANDARD",
                VersioningState::Enabled,
            )
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let latest = store.get_object(bucket.id, "x", None).await.unwrap_or_else(|e| panic!("{e}")).unwrap();
        assert_eq!(latest.content_hash.as_deref(), Some("hash-b"));

        let v1 = store
            .get_object(bucket.id, "x", p1.version_id.as_deref())
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap();
        assert_eq!(v1.content_hash.as_deref(), Some("hash-a"));
        assert_ne!(p1.version_id, p2.version_id);
    }

    #[tokio::test]
    async fn test_should_dedup_ref_count_reach_zero_after_both_deleted() {
        let store = InMemoryMetadataStore::new();
        let bucket = new_bucket(&store).await;

        store.upsert_blob_ref("shared-hash", 5, false, None).await.unwrap_or_else(|e| panic!("{e}"));
        store
            .tx_put_object(bucket.id, "a", "shared-hash", 5, "b", "e", BTreeMap::new(), "STANDARD", VersioningState::Disabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        store.upsert_blob_ref("shared-hash", 5, false, None).await.unwrap_or_else(|e| panic!("{e}"));
        store
            .tx_put_object(bucket.id, "b", "shared-hash", 5, "b", "e", BTreeMap::new(), "STANDARD", VersioningState::Disabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let blob = store.get_blob("shared-hash").await.unwrap_or_else(|e| panic!("{e}")).unwrap();
        assert_eq!(blob.ref_count, 2);

        store
            .tx_delete_object(bucket.id, "a", None, VersioningState::Disabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let blob = store.get_blob("shared-hash").await.unwrap_or_else(|e| panic!("{e}")).unwrap();
        assert_eq!(blob.ref_count, 1);

        store
            .tx_delete_object(bucket.id, "b", None, VersioningState::Disabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let blob = store.get_blob("shared-hash").await.unwrap_or_else(|e| panic!("{e}")).unwrap();
        assert_eq!(blob.ref_count, 0);
    }

    #[tokio::test]
    async fn test_should_create_delete_marker_as_new_latest_version() {
        let store = InMemoryMetadataStore::new();
        let bucket = new_bucket(&store).await;
        store
            .set_bucket_versioning(bucket.id, VersioningState::Enabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        store.upsert_blob_ref("h", 1, false, None).await.unwrap_or_else(|e| panic!("{e}"));
        store
            .tx_put_object(bucket.id, "x", "h", 1, "t", "e", BTreeMap::new(), "STANDARD", VersioningState::Enabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        let outcome = store
            .tx_delete_object(bucket.id, "x", None, VersioningState::Enabled)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(outcome.delete_marker_created);

        assert!(store.get_object(bucket.id, "x", None).await.unwrap_or_else(|e| panic!("{e}")).unwrap().is_delete_marker);
    }
}
