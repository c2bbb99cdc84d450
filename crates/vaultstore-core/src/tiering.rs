//! Policy-driven tier migration: moves blobs between Hot/Warm/Cold nodes based on
//! access age, with bounded concurrency and per-blob single-flight.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{info, warn};

type InFlightSet = Arc<Mutex<HashSet<String>>>;

use crate::config::TieringConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::Tier;

/// The inter-node transport the tiering controller drives. Modeled as a trait so the
/// controller can be exercised against an in-memory fake; the real wire transport is an
/// external collaborator (see crate docs).
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Streams `content_hash` from `source_node` to `target_node`.
    async fn transfer_blob(&self, source_node: &str, target_node: &str, content_hash: &str) -> EngineResult<u64>;

    /// Lists healthy node ids currently assigned the given tier.
    async fn nodes_with_tier(&self, tier: Tier) -> EngineResult<Vec<String>>;

    /// Lists healthy node ids that currently hold a copy of `content_hash`.
    async fn nodes_holding(&self, content_hash: &str) -> EngineResult<Vec<String>>;
}

/// A policy governing when blobs move between tiers.
#[derive(Debug, Clone)]
pub struct TieringPolicy {
    /// Policy name, for logging/operator visibility.
    pub name: String,
    /// Age after which a Hot blob moves to Warm.
    pub hot_to_warm: chrono::Duration,
    /// Age after which a Warm blob moves to Cold.
    pub warm_to_cold: chrono::Duration,
    /// Minimum blob size this policy applies to.
    pub min_size: u64,
    /// Maximum blob size this policy applies to (`u64::MAX` for unbounded).
    pub max_size: u64,
}

/// One blob's last-known access tier and timestamp.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    /// Blob content hash.
    pub content_hash: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// Current tier.
    pub tier: Tier,
    /// Time of last access.
    pub last_access: DateTime<Utc>,
}

/// A decision to move one blob to a new tier.
#[derive(Debug, Clone)]
pub struct TieringDecision {
    /// Blob to migrate.
    pub content_hash: String,
    /// Tier it currently sits in.
    pub source_tier: Tier,
    /// Tier it should move to.
    pub target_tier: Tier,
    /// Days since last access; higher priority migrates first.
    pub priority: i64,
}

/// Outcome of executing one [`TieringDecision`].
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// The blob migrated.
    pub content_hash: String,
    /// Whether the migration succeeded.
    pub success: bool,
    /// Bytes transferred, if successful.
    pub bytes_transferred: u64,
    /// Failure reason, if any.
    pub error: Option<String>,
}

fn next_tier(tier: Tier) -> Option<Tier> {
    match tier {
        Tier::Hot => Some(Tier::Warm),
        Tier::Warm => Some(Tier::Cold),
        Tier::Cold => None,
    }
}

/// Scans access records against policies and executes the resulting migrations with
/// bounded concurrency and per-blob single-flight.
pub struct TieringController {
    transport: Arc<dyn NodeTransport>,
    config: TieringConfig,
    in_flight: InFlightSet,
}

impl TieringController {
    /// Builds a controller driving migrations over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn NodeTransport>, config: TieringConfig) -> Self {
        Self {
            transport,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Evaluates `policies` against `records`, producing a decision for every blob
    /// whose tier age exceeds the relevant threshold and whose size matches the policy.
    #[must_use]
    pub fn scan(now: DateTime<Utc>, records: &[AccessRecord], policies: &[TieringPolicy]) -> Vec<TieringDecision> {
        let mut decisions = Vec::new();
        for record in records {
            for policy in policies {
                if record.size < policy.min_size || record.size > policy.max_size {
                    continue;
                }
                let age = now - record.last_access;
                let threshold = match record.tier {
                    Tier::Hot => policy.hot_to_warm,
                    Tier::Warm => policy.warm_to_cold,
                    Tier::Cold => continue,
                };
                if age < threshold {
                    continue;
                }
                let Some(target) = next_tier(record.tier) else {
                    continue;
                };
                decisions.push(TieringDecision {
                    content_hash: record.content_hash.clone(),
                    source_tier: record.tier,
                    target_tier: target,
                    priority: age.num_days(),
                });
                break;
            }
        }
        decisions.sort_by(|a, b| b.priority.cmp(&a.priority));
        decisions
    }

    /// Executes `decisions` under the configured concurrency cap, skipping any blob
    /// already in flight from a prior call.
    pub async fn execute(&self, decisions: Vec<TieringDecision>) -> Vec<MigrationOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_migrations.max(1)));
        let mut handles = Vec::new();

        for decision in decisions {
            let claimed = {
                let mut in_flight = self.in_flight.lock();
                in_flight.insert(decision.content_hash.clone())
            };
            if !claimed {
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let transport = Arc::clone(&self.transport);
            let in_flight = Arc::clone(&self.in_flight);
            let hash = decision.content_hash.clone();
            let target_tier = decision.target_tier;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = migrate_one(transport.as_ref(), &hash, target_tier).await;
                in_flight.lock().remove(&hash);
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "tiering migration task panicked"),
            }
        }
        outcomes
    }

    /// Synchronously migrates a single blob outside of policy, for operator-triggered moves.
    pub async fn force_move(&self, content_hash: &str, target_tier: Tier) -> MigrationOutcome {
        migrate_one(self.transport.as_ref(), content_hash, target_tier).await
    }
}

async fn migrate_one(transport: &dyn NodeTransport, content_hash: &str, target_tier: Tier) -> MigrationOutcome {
    let targets = match transport.nodes_with_tier(target_tier).await {
        Ok(nodes) => nodes,
        Err(e) => {
            return MigrationOutcome {
                content_hash: content_hash.to_string(),
                success: false,
                bytes_transferred: 0,
                error: Some(e.to_string()),
            }
        }
    };
    let Some(target_node) = targets.first() else {
        return MigrationOutcome {
            content_hash: content_hash.to_string(),
            success: false,
            bytes_transferred: 0,
            error: Some("no healthy node for target tier".into()),
        };
    };

    let holders = match transport.nodes_holding(content_hash).await {
        Ok(nodes) => nodes,
        Err(e) => {
            return MigrationOutcome {
                content_hash: content_hash.to_string(),
                success: false,
                bytes_transferred: 0,
                error: Some(e.to_string()),
            }
        }
    };
    let Some(source_node) = holders.into_iter().find(|n| n != target_node) else {
        return MigrationOutcome {
            content_hash: content_hash.to_string(),
            success: false,
            bytes_transferred: 0,
            error: Some("no eligible source node".into()),
        };
    };

    match transport.transfer_blob(&source_node, target_node, content_hash).await {
        Ok(bytes) => {
            info!(hash = %content_hash, bytes, "tiering migration complete");
            MigrationOutcome {
                content_hash: content_hash.to_string(),
                success: true,
                bytes_transferred: bytes,
                error: None,
            }
        }
        Err(e) => MigrationOutcome {
            content_hash: content_hash.to_string(),
            success: false,
            bytes_transferred: 0,
            error: Some(e.to_string()),
        },
    }
}
