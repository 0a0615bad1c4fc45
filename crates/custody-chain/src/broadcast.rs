//! Raw-transaction submission with bounded backoff.

use std::time::Duration;

use tracing::warn;

use shared_types::{CoreError, CoreResult};

use crate::rpc::ChainRpc;

/// Submit a signed payload, retrying transient failures with exponential
/// backoff (`base_delay`, doubled per attempt). Permanent RPC failures are
/// returned immediately; exhausting the budget returns the last transient
/// error.
pub async fn broadcast_with_retry<C: ChainRpc>(
    rpc: &C,
    raw: &[u8],
    max_attempts: u32,
    base_delay: Duration,
) -> CoreResult<String> {
    let mut delay = base_delay;
    let mut last_err = CoreError::TransientRemote("broadcast not attempted".into());

    for attempt in 1..=max_attempts.max(1) {
        match rpc.send_raw_transaction(raw).await {
            Ok(tx_hash) => return Ok(tx_hash),
            Err(err) if err.is_transient() => {
                warn!(attempt, %err, "broadcast attempt failed");
                last_err = err;
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let chain = MockChain::new();
        chain.fail_broadcasts(2).await;
        let hash = broadcast_with_retry(&chain, b"raw", 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(chain.broadcast_log().await.len(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_transient() {
        let chain = MockChain::new();
        chain.fail_broadcasts(10).await;
        let err = broadcast_with_retry(&chain, b"raw", 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(chain.broadcast_log().await.is_empty());
    }
}
