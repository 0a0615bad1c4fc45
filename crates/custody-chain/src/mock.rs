//! Scriptable in-memory chain for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use primitive_types::U256;
use tokio::sync::RwLock;

use shared_crypto::keccak256;
use shared_types::{CoreError, CoreResult, EthAddress};

use crate::rpc::{Block, BlockTx, ChainRpc, FeeHistoryQuote, Receipt};

struct MockInner {
    head: u64,
    blocks: HashMap<u64, Block>,
    receipts: HashMap<String, Receipt>,
    pending_nonces: HashMap<String, u64>,
    gas_price: U256,
    broadcasts: Vec<String>,
    transient_broadcast_failures: u32,
    revert_next_broadcast: bool,
}

/// In-memory chain with injection hooks for the integration suite:
/// broadcasts mine into the next block, `advance_blocks` moves the head for
/// confirmation counting, `inject_transfer` fabricates inbound deposits,
/// and failure toggles script transient errors and on-chain reverts.
pub struct MockChain {
    inner: RwLock<MockInner>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MockInner {
                head: 100,
                blocks: HashMap::new(),
                receipts: HashMap::new(),
                pending_nonces: HashMap::new(),
                gas_price: U256::from(20_000_000_000u64),
                broadcasts: Vec::new(),
                transient_broadcast_failures: 0,
                revert_next_broadcast: false,
            }),
        }
    }

    /// Move the head forward without new transactions.
    pub async fn advance_blocks(&self, n: u64) {
        let mut inner = self.inner.write().await;
        inner.head += n;
    }

    pub async fn head(&self) -> u64 {
        self.inner.read().await.head
    }

    /// Fabricate an inbound transfer mined in the next block.
    pub async fn inject_transfer(
        &self,
        from: EthAddress,
        to: EthAddress,
        value: U256,
    ) -> String {
        let mut inner = self.inner.write().await;
        inner.head += 1;
        let number = inner.head;
        let tx_hash = format!(
            "0x{}",
            hex::encode(keccak256(
                format!("{}:{}:{}:{}", from, to, value, number).as_bytes()
            ))
        );
        let block = inner.blocks.entry(number).or_insert_with(|| Block {
            number,
            timestamp: 1_700_000_000 + number,
            transactions: Vec::new(),
        });
        block.transactions.push(BlockTx {
            hash: tx_hash.clone(),
            from: Some(from),
            to: Some(to),
            value,
        });
        tx_hash
    }

    /// Fail the next `n` broadcasts with a transient error.
    pub async fn fail_broadcasts(&self, n: u32) {
        self.inner.write().await.transient_broadcast_failures = n;
    }

    /// Make the next broadcast mine with receipt status 0.
    pub async fn revert_next_broadcast(&self) {
        self.inner.write().await.revert_next_broadcast = true;
    }

    pub async fn set_pending_nonce(&self, address: &EthAddress, nonce: u64) {
        self.inner
            .write()
            .await
            .pending_nonces
            .insert(address.as_str().to_string(), nonce);
    }

    /// Raw payload hashes accepted so far, in order.
    pub async fn broadcast_log(&self) -> Vec<String> {
        self.inner.read().await.broadcasts.clone()
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn block_number(&self) -> CoreResult<u64> {
        Ok(self.inner.read().await.head)
    }

    async fn block_with_txs(&self, number: u64) -> CoreResult<Option<Block>> {
        let inner = self.inner.read().await;
        if number > inner.head {
            return Ok(None);
        }
        Ok(Some(inner.blocks.get(&number).cloned().unwrap_or(Block {
            number,
            timestamp: 1_700_000_000 + number,
            transactions: Vec::new(),
        })))
    }

    async fn gas_price(&self) -> CoreResult<U256> {
        Ok(self.inner.read().await.gas_price)
    }

    async fn fee_history(&self) -> CoreResult<Option<FeeHistoryQuote>> {
        // The mock models a pre-1559 node.
        Ok(None)
    }

    async fn estimate_gas(
        &self,
        _from: &EthAddress,
        _to: &EthAddress,
        _value: U256,
        data: Option<&str>,
    ) -> CoreResult<u64> {
        Ok(if data.is_some() { 60_000 } else { 21_000 })
    }

    async fn pending_nonce(&self, address: &EthAddress) -> CoreResult<u64> {
        Ok(self
            .inner
            .read()
            .await
            .pending_nonces
            .get(address.as_str())
            .copied()
            .unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> CoreResult<String> {
        let mut inner = self.inner.write().await;
        if inner.transient_broadcast_failures > 0 {
            inner.transient_broadcast_failures -= 1;
            return Err(CoreError::TransientRemote("mock node unreachable".into()));
        }
        let tx_hash = format!("0x{}", hex::encode(keccak256(raw)));
        inner.head += 1;
        let number = inner.head;
        let reverted = std::mem::take(&mut inner.revert_next_broadcast);
        let gas_price = inner.gas_price;
        inner.receipts.insert(
            tx_hash.clone(),
            Receipt {
                status: Some(if reverted { 0 } else { 1 }),
                block_number: Some(number),
                gas_used: Some(21_000),
                effective_gas_price: Some(gas_price),
            },
        );
        inner.broadcasts.push(tx_hash.clone());
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> CoreResult<Option<Receipt>> {
        Ok(self.inner.read().await.receipts.get(tx_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tail: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{:040x}", tail)).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_mines_with_receipt() {
        let chain = MockChain::new();
        let start = chain.head().await;
        let hash = chain.send_raw_transaction(b"rawtx").await.unwrap();
        let receipt = chain.transaction_receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, Some(1));
        assert_eq!(receipt.block_number, Some(start + 1));
    }

    #[tokio::test]
    async fn test_scripted_transient_failures() {
        let chain = MockChain::new();
        chain.fail_broadcasts(2).await;
        assert!(chain.send_raw_transaction(b"a").await.is_err());
        assert!(chain.send_raw_transaction(b"a").await.is_err());
        assert!(chain.send_raw_transaction(b"a").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_transfer_is_visible_in_block() {
        let chain = MockChain::new();
        let hash = chain
            .inject_transfer(addr(0xaa), addr(0xbb), U256::from(9u64))
            .await;
        let head = chain.head().await;
        let block = chain.block_with_txs(head).await.unwrap().unwrap();
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].hash, hash);
        assert_eq!(block.transactions[0].to.as_ref().unwrap(), &addr(0xbb));
    }

    #[tokio::test]
    async fn test_reverted_broadcast_receipt() {
        let chain = MockChain::new();
        chain.revert_next_broadcast().await;
        let hash = chain.send_raw_transaction(b"boom").await.unwrap();
        let receipt = chain.transaction_receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.status, Some(0));
    }
}
