//! Closed error taxonomy for the storage engine.

/// Errors returned by every component of the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No bucket exists with the given name.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// No object exists for the given bucket/key/version.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// No multipart upload exists for the given id.
    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    /// A bucket with this name already exists.
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// Bucket deletion was attempted while it still contains objects.
    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    /// Caller-supplied input failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller is not permitted to perform the operation.
    #[error("access denied")]
    AccessDenied,

    /// Declared size did not match the observed stream length.
    #[error("size mismatch: declared {declared}, observed {observed}")]
    SizeMismatch {
        /// Size the caller declared up front.
        declared: u64,
        /// Size actually observed while streaming.
        observed: u64,
    },

    /// Integrity check (AEAD tag, checksum) failed.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// A multipart part reference was invalid.
    #[error("invalid part: {0}")]
    InvalidPart(String),

    /// A non-final part was smaller than the minimum allowed size.
    #[error("entity too small: part {part_number} is {size} bytes, minimum is {minimum}")]
    EntityTooSmall {
        /// The offending part number.
        part_number: u32,
        /// Its size in bytes.
        size: u64,
        /// The minimum required size.
        minimum: u64,
    },

    /// Parts were not supplied in strictly ascending order.
    #[error("invalid part order at part {0}")]
    InvalidPartOrder(u32),

    /// The blob store backend is unavailable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The metadata store backend is unavailable.
    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// An inter-node blob transfer failed.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancellation,

    /// Requested blob does not exist in the blob store.
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Catch-all for unexpected internal failures, preserving context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// True for errors the Blob/Metadata boundary should retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StorageUnavailable(_) | EngineError::MetadataUnavailable(_)
        )
    }
}
