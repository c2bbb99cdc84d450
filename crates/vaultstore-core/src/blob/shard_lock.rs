//! Fixed-size pool of per-hash locks used to serialize concurrent writers of the
//! same blob while letting unrelated blobs proceed in parallel.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

const SHARD_COUNT: usize = 256;

/// A pool of 256 async mutexes, selected by the first byte of a content hash.
///
/// The lock is a `tokio::sync::Mutex` rather than a `parking_lot` one because it is
/// explicitly meant to span `.await` points across the full streaming write/read path.
#[derive(Debug)]
pub struct ShardLockPool {
    shards: Vec<Arc<Mutex<()>>>,
}

impl Default for ShardLockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardLockPool {
    /// Builds a pool with 256 independent shards.
    #[must_use]
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Arc::new(Mutex::new(()))).collect();
        Self { shards }
    }

    fn shard_index(content_hash: &str) -> usize {
        content_hash
            .as_bytes()
            .first()
            .copied()
            .map_or(0, |first_hex_char| {
                // content_hash is lowercase hex; use the first two hex chars (one byte)
                // when available for even distribution, falling back to the raw byte.
                let byte = u8::from_str_radix(&content_hash[..2.min(content_hash.len())], 16)
                    .unwrap_or(first_hex_char);
                byte as usize % SHARD_COUNT
            })
    }

    /// Acquires the shard lock guarding `content_hash`, holding it across the returned guard's
    /// lifetime (including any `.await` points the caller performs while holding it).
    pub async fn acquire(&self, content_hash: &str) -> OwnedMutexGuard<()> {
        let shard = Arc::clone(&self.shards[Self::shard_index(content_hash)]);
        shard.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_same_hash_to_same_shard() {
        let a = ShardLockPool::shard_index("abcd1234");
        let b = ShardLockPool::shard_index("abcd9999");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_should_serialize_same_hash_allow_different_hash() {
        let pool = ShardLockPool::new();
        let g1 = pool.acquire("aa11111111111111111111111111111111111111111111111111111111111111").await;
        // A different shard (first byte "bb") must be immediately acquirable.
        let g2 = pool.acquire("bb22222222222222222222222222222222222222222222222222222222222222").await;
        drop(g1);
        drop(g2);
    }
}
