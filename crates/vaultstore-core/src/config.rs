//! Typed, environment-overridable configuration for the storage engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Encryption scheme applied to new blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptoScheme {
    /// No encryption; blobs are stored as plaintext.
    None,
    /// Chunked ChaCha20-Poly1305 AEAD with per-blob HKDF subkeys.
    ChaCha20Poly1305Streaming,
    /// Legacy single-shot AEAD scheme retained for reading older blobs.
    Aes256GcmLegacy,
}

/// Storage-layer configuration: where blobs live on disk.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Root directory for the sharded blob tree.
    pub data_dir: PathBuf,

    /// Directory used for in-progress writes before atomic rename.
    #[builder(default)]
    pub temp_dir: Option<PathBuf>,

    /// Number of shard directory levels.
    #[builder(default = 2)]
    pub shard_depth: usize,

    /// Number of hex characters consumed per shard level.
    #[builder(default = 2)]
    pub shard_width: usize,
}

impl StorageConfig {
    /// The effective temp directory, defaulting to `<data_dir>/tmp`.
    #[must_use]
    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tmp"))
    }
}

/// Cryptography configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct CryptoConfig {
    /// 32-byte master key used to derive per-blob subkeys; base64-encoded in env/JSON.
    #[builder(default)]
    pub master_key: Option<[u8; 32]>,

    /// Plaintext chunk size used for streaming AEAD and range reads.
    #[builder(default = 16 * 1024 * 1024)]
    pub chunk_size: usize,

    /// Which scheme new blobs are written under.
    #[builder(default = CryptoScheme::None)]
    pub scheme: CryptoScheme,
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct GcConfig {
    /// Interval between GC passes.
    #[builder(default = Duration::from_secs(3600))]
    pub interval: Duration,

    /// Minimum time a blob must sit at ref_count=0 before collection.
    #[builder(default = Duration::from_secs(24 * 3600))]
    pub grace_period: Duration,

    /// Maximum blobs examined per GC pass.
    #[builder(default = 1000)]
    pub batch_size: usize,
}

/// Tiering controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct TieringConfig {
    /// Interval between policy scans.
    #[builder(default = Duration::from_secs(3600))]
    pub scan_interval: Duration,

    /// Maximum concurrent blob migrations.
    #[builder(default = 5)]
    pub max_concurrent_migrations: usize,

    /// Maximum candidates considered per scan.
    #[builder(default = 100)]
    pub migration_batch_size: usize,
}

/// Cluster (inter-node) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Interval between heartbeats.
    #[builder(default = Duration::from_secs(10))]
    pub heartbeat_interval: Duration,

    /// Time after which a silent node is considered unhealthy.
    #[builder(default = Duration::from_secs(30))]
    pub heartbeat_timeout: Duration,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Storage layer settings.
    pub storage: StorageConfig,

    /// Cryptography settings.
    #[builder(default = CryptoConfig::builder().build())]
    pub crypto: CryptoConfig,

    /// Garbage collection settings.
    #[builder(default = GcConfig::builder().build())]
    pub gc: GcConfig,

    /// Tiering controller settings.
    #[builder(default = TieringConfig::builder().build())]
    pub tiering: TieringConfig,

    /// Cluster settings.
    #[builder(default = ClusterConfig::builder().build())]
    pub cluster: ClusterConfig,
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Builds a configuration from environment variables, falling back to defaults.
    ///
    /// `STORAGE_DATA_DIR` is required; all other variables are optional.
    #[must_use]
    pub fn from_env() -> Self {
        let data_dir = std::env::var("STORAGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let temp_dir = std::env::var("STORAGE_TEMP_DIR").ok().map(PathBuf::from);

        let storage = StorageConfig::builder()
            .data_dir(data_dir)
            .temp_dir(temp_dir)
            .shard_depth(env_usize("STORAGE_SHARD_DEPTH", 2))
            .shard_width(env_usize("STORAGE_SHARD_WIDTH", 2))
            .build();

        let master_key = std::env::var("CRYPTO_MASTER_KEY")
            .ok()
            .and_then(|b64| {
                use base64::Engine as _;
                base64::engine::general_purpose::STANDARD.decode(b64).ok()
            })
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok());

        let scheme = match std::env::var("CRYPTO_SCHEME").as_deref() {
            Ok("chacha20-poly1305-streaming") => CryptoScheme::ChaCha20Poly1305Streaming,
            Ok("aes-256-gcm-legacy") => CryptoScheme::Aes256GcmLegacy,
            _ if master_key.is_some() => CryptoScheme::ChaCha20Poly1305Streaming,
            _ => CryptoScheme::None,
        };

        let crypto = CryptoConfig::builder()
            .master_key(master_key)
            .chunk_size(env_usize("CRYPTO_CHUNK_SIZE", 16 * 1024 * 1024))
            .scheme(scheme)
            .build();

        let gc = GcConfig::builder()
            .interval(env_duration_secs("GC_INTERVAL_SECS", Duration::from_secs(3600)))
            .grace_period(env_duration_secs(
                "GC_GRACE_PERIOD_SECS",
                Duration::from_secs(24 * 3600),
            ))
            .batch_size(env_usize("GC_BATCH_SIZE", 1000))
            .build();

        let tiering = TieringConfig::builder()
            .scan_interval(env_duration_secs(
                "TIERING_SCAN_INTERVAL_SECS",
                Duration::from_secs(3600),
            ))
            .max_concurrent_migrations(env_usize("TIERING_MAX_CONCURRENT_MIGRATIONS", 5))
            .migration_batch_size(env_usize("TIERING_MIGRATION_BATCH_SIZE", 100))
            .build();

        let cluster = ClusterConfig::builder()
            .heartbeat_interval(env_duration_secs(
                "CLUSTER_HEARTBEAT_INTERVAL_SECS",
                Duration::from_secs(10),
            ))
            .heartbeat_timeout(env_duration_secs(
                "CLUSTER_HEARTBEAT_TIMEOUT_SECS",
                Duration::from_secs(30),
            ))
            .build();

        EngineConfig::builder()
            .storage(storage)
            .crypto(crypto)
            .gc(gc)
            .tiering(tiering)
            .cluster(cluster)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_default_storage_temp_dir_under_data_dir() {
        let cfg = StorageConfig::builder()
            .data_dir(PathBuf::from("/srv/vaultstore"))
            .build();
        assert_eq!(cfg.effective_temp_dir(), PathBuf::from("/srv/vaultstore/tmp"));
    }

    #[test]
    fn test_should_serialize_camel_case() {
        let cfg = StorageConfig::builder()
            .data_dir(PathBuf::from("/data"))
            .build();
        let json = serde_json::to_string(&cfg)
            .unwrap_or_else(|e| panic!("serialize failed: {e}"));
        assert!(json.contains("\"dataDir\""));
        assert!(json.contains("\"shardDepth\""));
    }

    #[test]
    fn test_should_build_from_env_with_defaults() {
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.gc.batch_size, 1000);
        assert_eq!(cfg.tiering.max_concurrent_migrations, 5);
    }
}
