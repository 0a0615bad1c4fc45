//! Per-sender serialized nonce assignment.

use std::collections::HashMap;

use tokio::sync::Mutex;

use shared_types::{CoreResult, EthAddress};

use crate::rpc::ChainRpc;

/// Hands out strictly increasing nonces per sender.
///
/// Under the mutex: read the chain's pending nonce, take the max of it and
/// the cached next value, return that, and cache `returned + 1`. The cache
/// lives in this process only; a multi-process deployment replaces it with
/// a per-wallet advisory lock and always reads the pending nonce on
/// acquire.
pub struct NonceManager {
    cache: Mutex<HashMap<String, u64>>,
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceManager {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Next nonce for `address`.
    pub async fn next_nonce<C: ChainRpc>(
        &self,
        rpc: &C,
        address: &EthAddress,
    ) -> CoreResult<u64> {
        let mut cache = self.cache.lock().await;
        let chain_nonce = rpc.pending_nonce(address).await?;
        let cached = cache.get(address.as_str()).copied().unwrap_or(0);
        let nonce = chain_nonce.max(cached);
        cache.insert(address.as_str().to_string(), nonce + 1);
        Ok(nonce)
    }

    /// Drop the cache entry (after a permanent broadcast failure).
    pub async fn reset(&self, address: &EthAddress) {
        self.cache.lock().await.remove(address.as_str());
    }
}
