//! TTL cache for screening results.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use shared_types::Direction;

use crate::ports::RiskLevel;

/// Cache key: `(network, subject, direction)` where the subject is an
/// address for address checks or a transaction hash for transfer checks.
pub type CacheKey = (String, String, Direction);

/// Async-safe map of screening results with time-based eviction.
pub struct RiskCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, (RiskLevel, Instant)>>,
}

impl RiskCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A fresh result for the key, if one is cached and unexpired.
    pub async fn get(&self, key: &CacheKey) -> Option<RiskLevel> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((risk, stored_at)) if stored_at.elapsed() < self.ttl => Some(*risk),
            _ => None,
        }
    }

    /// Store a result, evicting any expired entries in the same write.
    pub async fn put(&self, key: CacheKey, risk: RiskLevel) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
        entries.insert(key, (risk, Instant::now()));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(subject: &str) -> CacheKey {
        ("ETH".into(), subject.into(), Direction::Outbound)
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = RiskCache::new(Duration::from_secs(60));
        cache.put(key("0xaa"), RiskLevel::Low).await;
        assert_eq!(cache.get(&key("0xaa")).await, Some(RiskLevel::Low));
    }

    #[tokio::test]
    async fn test_miss_after_expiry() {
        let cache = RiskCache::new(Duration::from_millis(10));
        cache.put(key("0xaa"), RiskLevel::Low).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get(&key("0xaa")).await, None);
    }

    #[tokio::test]
    async fn test_direction_is_part_of_the_key() {
        let cache = RiskCache::new(Duration::from_secs(60));
        cache.put(key("0xaa"), RiskLevel::Severe).await;
        let inbound = ("ETH".to_string(), "0xaa".to_string(), Direction::Inbound);
        assert_eq!(cache.get(&inbound).await, None);
    }

    #[tokio::test]
    async fn test_put_evicts_expired() {
        let cache = RiskCache::new(Duration::from_millis(10));
        cache.put(key("0xaa"), RiskLevel::Low).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        cache.put(key("0xbb"), RiskLevel::Low).await;
        assert_eq!(cache.len().await, 1);
    }
}
