//! Core entity types shared by the metadata store and the services built on top of it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Surrogate identifier.
    pub id: i64,
    /// Unique login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Bcrypt password hash; never logged or serialized to API responses.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the account may authenticate.
    pub is_active: bool,
    /// Whether the account has administrative privileges.
    pub is_admin: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Bucket versioning state. Once `Enabled`, may only move to `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningState {
    /// Versioning was never turned on.
    Disabled,
    /// Every write creates a new version.
    Enabled,
    /// Versioning was turned on and then suspended; existing versions are retained.
    Suspended,
}

impl VersioningState {
    /// True if `self -> next` is an allowed transition.
    #[must_use]
    pub fn can_transition_to(self, next: VersioningState) -> bool {
        match (self, next) {
            (VersioningState::Enabled, VersioningState::Disabled) => false,
            _ => true,
        }
    }
}

/// Bucket access control list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketAcl {
    /// Only the owner may read or write.
    Private,
    /// Anyone may read; only the owner may write.
    PublicRead,
    /// Anyone may read or write.
    PublicReadWrite,
}

/// A bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    /// Surrogate identifier.
    pub id: i64,
    /// Owning user.
    pub owner_id: i64,
    /// Globally unique bucket name.
    pub name: String,
    /// Region the bucket was created in.
    pub region: String,
    /// Current versioning state.
    pub versioning: VersioningState,
    /// Access control list.
    pub acl: BucketAcl,
    /// Whether object lock is enabled (irreversible once true).
    pub object_lock: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// An object version row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Surrogate identifier.
    pub id: i64,
    /// Owning bucket.
    pub bucket_id: i64,
    /// Object key.
    pub key: String,
    /// Version identifier; `None` represents the unversioned/suspended sentinel.
    pub version_id: Option<String>,
    /// Whether this is the current version for `(bucket_id, key)`.
    pub is_latest: bool,
    /// Whether this row is a delete marker (no content).
    pub is_delete_marker: bool,
    /// Content hash; `None` iff this is a delete marker.
    pub content_hash: Option<String>,
    /// Size in bytes; 0 for delete markers.
    pub size: u64,
    /// MIME content type.
    pub content_type: String,
    /// ETag as returned to clients.
    pub etag: String,
    /// Storage class label (Hot/Warm/Cold or similar).
    pub storage_class: String,
    /// User-supplied metadata.
    pub metadata: BTreeMap<String, String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-delete timestamp; `None` while live.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ObjectVersion {
    /// True if this row represents live, visible content (not soft-deleted, not a marker).
    #[must_use]
    pub fn is_live_content(&self) -> bool {
        self.deleted_at.is_none() && !self.is_delete_marker
    }
}

/// A content-addressed blob's metadata row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Hex SHA-256 content hash; primary key.
    pub content_hash: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Number of live references (object/part rows) pointing at this hash.
    pub ref_count: i64,
    /// Whether the on-disk bytes are encrypted.
    pub is_encrypted: bool,
    /// Encryption scheme tag, if encrypted.
    pub encryption_scheme: Option<String>,
    /// When the blob was first stored.
    pub created_at: DateTime<Utc>,
    /// Updated whenever ref_count transitions to/from zero or the blob is read.
    pub last_referenced_at: DateTime<Utc>,
}

/// Multipart upload lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultipartStatus {
    /// Accepting `UploadPart` calls.
    InProgress,
    /// Successfully assembled into a final object.
    Completed,
    /// Cancelled; all parts released.
    Aborted,
}

/// A multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUpload {
    /// UUID upload id.
    pub id: String,
    /// Target bucket.
    pub bucket_id: i64,
    /// Target key.
    pub key: String,
    /// Initiation timestamp.
    pub initiated_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: MultipartStatus,
    /// Content type to apply to the final object.
    pub content_type: String,
    /// User metadata to apply to the final object.
    pub metadata: BTreeMap<String, String>,
    /// Storage class to apply to the final object.
    pub storage_class: String,
}

/// A single uploaded part of a multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPart {
    /// Owning upload.
    pub upload_id: String,
    /// 1-based part number, unique per upload.
    pub part_number: u32,
    /// Plaintext size in bytes.
    pub size: u64,
    /// ETag (hex MD5) of the part's plaintext.
    pub etag: String,
    /// Content hash of the part's blob.
    pub content_hash: String,
    /// Upload timestamp.
    pub uploaded_at: DateTime<Utc>,
}

/// Lifecycle rule status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleRuleStatus {
    /// The rule is evaluated by the expiration pass.
    Enabled,
    /// The rule is stored but ignored.
    Disabled,
}

/// A bucket lifecycle rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRule {
    /// Surrogate identifier.
    pub id: i64,
    /// Owning bucket.
    pub bucket_id: i64,
    /// Rule identifier, unique per bucket.
    pub rule_id: String,
    /// Key prefix this rule applies to.
    pub prefix: String,
    /// Days after creation at which matching objects expire; `None` disables expiration.
    pub expiration_days: Option<u32>,
    /// Whether the rule is evaluated.
    pub status: LifecycleRuleStatus,
}

/// Tier assigned to a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// Frequently accessed, lowest latency.
    Hot,
    /// Infrequently accessed.
    Warm,
    /// Rarely accessed, highest latency / lowest cost.
    Cold,
}

/// Records that a node holds a copy of a blob (cluster mode only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobLocation {
    /// Content hash of the blob.
    pub content_hash: String,
    /// Node holding this copy.
    pub node_id: String,
    /// Whether this copy is the primary (authoritative) one.
    pub is_primary: bool,
    /// When this copy was last confirmed in sync.
    pub synced_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_reject_enabled_to_disabled_transition() {
        assert!(!VersioningState::Enabled.can_transition_to(VersioningState::Disabled));
    }

    #[test]
    fn test_should_allow_enabled_to_suspended_transition() {
        assert!(VersioningState::Enabled.can_transition_to(VersioningState::Suspended));
    }

    #[test]
    fn test_should_allow_disabled_to_enabled_transition() {
        assert!(VersioningState::Disabled.can_transition_to(VersioningState::Enabled));
    }
}
