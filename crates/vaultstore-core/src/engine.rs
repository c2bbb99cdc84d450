//! Top-level wiring: constructs the Blob Store and Metadata Store from configuration
//! and exposes the object/multipart services built on top of them.

use std::sync::Arc;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::gc::GcController;
use crate::metadata::memory::InMemoryMetadataStore;
use crate::metadata::MetadataStore;
use crate::multipart_service::MultipartService;
use crate::object_service::ObjectService;

/// Owns the storage backends and exposes the services built on top of them.
pub struct StorageEngine {
    config: EngineConfig,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    object_service: ObjectService,
    multipart_service: MultipartService,
}

impl StorageEngine {
    /// Builds an engine from configuration, running the blob store's janitor pass once
    /// before returning.
    pub async fn new(config: EngineConfig) -> EngineResult<Self> {
        let fs_store = FsBlobStore::new(config.storage.clone(), config.crypto.clone());
        fs_store.run_janitor().await?;
        let blobs: Arc<dyn BlobStore> = Arc::new(fs_store);
        let metadata: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());

        let object_service = ObjectService::new(Arc::clone(&blobs), Arc::clone(&metadata));
        let multipart_service = MultipartService::new(Arc::clone(&blobs), Arc::clone(&metadata));

        Ok(Self {
            config,
            blobs,
            metadata,
            object_service,
            multipart_service,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The object service (PUT/GET/HEAD/DELETE/COPY/LIST).
    #[must_use]
    pub fn objects(&self) -> &ObjectService {
        &self.object_service
    }

    /// The multipart upload service.
    #[must_use]
    pub fn multipart(&self) -> &MultipartService {
        &self.multipart_service
    }

    /// Builds a garbage collector over this engine's backends.
    #[must_use]
    pub fn gc_controller(&self) -> GcController {
        GcController::new(Arc::clone(&self.blobs), Arc::clone(&self.metadata), self.config.gc.clone())
    }

    /// Direct access to the metadata store, for callers that need bucket administration
    /// or lifecycle-rule management beyond what the object/multipart services expose.
    #[must_use]
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Direct access to the blob store.
    #[must_use]
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }
}
