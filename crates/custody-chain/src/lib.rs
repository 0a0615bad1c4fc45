//! # Custody Chain
//!
//! Ethereum connectivity for the custody core.
//!
//! - [`ChainRpc`] - the port every chain-facing component depends on
//! - [`HttpChainRpc`] - JSON-RPC over HTTP adapter
//! - [`MockChain`] - scriptable in-memory chain for tests
//! - [`GasOracle`] - fee quoting with EIP-1559 probe and legacy fallback
//! - [`NonceManager`] - serialized per-sender nonce assignment
//! - [`tx`] - legacy EIP-155 transaction building on top of `shared-crypto`
//! - [`LocalSigner`] - synchronous signing for LOCAL_KEY custody
//! - [`broadcast_with_retry`] - bounded-backoff raw-transaction submission

pub mod broadcast;
pub mod gas;
pub mod http;
pub mod mock;
pub mod nonce;
pub mod rpc;
pub mod signer;
pub mod tx;

pub use broadcast::broadcast_with_retry;
pub use gas::{GasOracle, GasQuote};
pub use http::HttpChainRpc;
pub use mock::MockChain;
pub use nonce::NonceManager;
pub use rpc::{Block, BlockTx, ChainRpc, FeeHistoryQuote, Receipt};
pub use signer::LocalSigner;
pub use tx::build_tx_fields;
