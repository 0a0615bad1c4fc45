//! The chain RPC port.

use async_trait::async_trait;
use primitive_types::U256;

use shared_types::{CoreResult, EthAddress};

/// A block with full transactions, as needed by the deposit scanner.
#[derive(Clone, Debug)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64,
    pub transactions: Vec<BlockTx>,
}

/// One transaction inside a scanned block.
#[derive(Clone, Debug)]
pub struct BlockTx {
    pub hash: String,
    pub from: Option<EthAddress>,
    pub to: Option<EthAddress>,
    pub value: U256,
}

/// Transaction receipt fields the core consumes.
#[derive(Clone, Debug)]
pub struct Receipt {
    /// 1 = success, 0 = reverted.
    pub status: Option<u64>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub effective_gas_price: Option<U256>,
}

/// EIP-1559 fee probe result.
#[derive(Clone, Copy, Debug)]
pub struct FeeHistoryQuote {
    pub base_fee: U256,
    pub max_priority_fee: U256,
    pub max_fee: U256,
}

/// Everything the core asks of an Ethereum node.
///
/// Unreachable/timed-out calls surface as `TransientRemote`; an RPC-level
/// error object is `PermanentRemote`.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> CoreResult<u64>;
    async fn block_with_txs(&self, number: u64) -> CoreResult<Option<Block>>;
    async fn gas_price(&self) -> CoreResult<U256>;
    /// `None` when the node does not support `eth_feeHistory`.
    async fn fee_history(&self) -> CoreResult<Option<FeeHistoryQuote>>;
    async fn estimate_gas(
        &self,
        from: &EthAddress,
        to: &EthAddress,
        value: U256,
        data: Option<&str>,
    ) -> CoreResult<u64>;
    /// `eth_getTransactionCount(addr, "pending")`.
    async fn pending_nonce(&self, address: &EthAddress) -> CoreResult<u64>;
    /// Returns the chain-reported transaction hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> CoreResult<String>;
    async fn transaction_receipt(&self, tx_hash: &str) -> CoreResult<Option<Receipt>>;
}
