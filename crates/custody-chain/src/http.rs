//! JSON-RPC over HTTP adapter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use primitive_types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use shared_types::{CoreError, CoreResult, EthAddress};

use crate::rpc::{Block, BlockTx, ChainRpc, FeeHistoryQuote, Receipt};

/// Ethereum JSON-RPC client.
pub struct HttpChainRpc {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl HttpChainRpc {
    pub fn new(url: &str) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| CoreError::Configuration(format!("chain rpc client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> CoreResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientRemote(format!("{method}: {e}")))?;

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| CoreError::TransientRemote(format!("{method} body: {e}")))?;

        if let Some(err) = envelope.error {
            return Err(CoreError::PermanentRemote(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }
        envelope
            .result
            .ok_or_else(|| CoreError::PermanentRemote(format!("{method}: empty result")))
    }
}

/// Parse a `0x`-prefixed JSON-RPC quantity into u64.
pub(crate) fn parse_quantity(value: &Value) -> CoreResult<u64> {
    let raw = value
        .as_str()
        .ok_or_else(|| CoreError::PermanentRemote(format!("expected quantity, got {value}")))?;
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| CoreError::PermanentRemote(format!("bad quantity {raw}: {e}")))
}

/// Parse a `0x`-prefixed JSON-RPC quantity into U256.
pub(crate) fn parse_u256(value: &Value) -> CoreResult<U256> {
    let raw = value
        .as_str()
        .ok_or_else(|| CoreError::PermanentRemote(format!("expected quantity, got {value}")))?;
    U256::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| CoreError::PermanentRemote(format!("bad quantity {raw}: {e}")))
}

fn parse_block(value: &Value) -> CoreResult<Block> {
    let number = parse_quantity(&value["number"])?;
    let timestamp = parse_quantity(&value["timestamp"])?;
    let mut transactions = Vec::new();
    if let Some(txs) = value["transactions"].as_array() {
        for tx in txs {
            let hash = tx["hash"].as_str().unwrap_or_default().to_string();
            let from = tx["from"].as_str().and_then(|a| EthAddress::parse(a).ok());
            let to = tx["to"].as_str().and_then(|a| EthAddress::parse(a).ok());
            let value = parse_u256(&tx["value"]).unwrap_or_default();
            transactions.push(BlockTx {
                hash,
                from,
                to,
                value,
            });
        }
    }
    Ok(Block {
        number,
        timestamp,
        transactions,
    })
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn block_number(&self) -> CoreResult<u64> {
        parse_quantity(&self.call("eth_blockNumber", json!([])).await?)
    }

    async fn block_with_txs(&self, number: u64) -> CoreResult<Option<Block>> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("0x{number:x}"), true]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_block(&result).map(Some)
    }

    async fn gas_price(&self) -> CoreResult<U256> {
        parse_u256(&self.call("eth_gasPrice", json!([])).await?)
    }

    async fn fee_history(&self) -> CoreResult<Option<FeeHistoryQuote>> {
        let result = match self
            .call("eth_feeHistory", json!([1, "latest", [25, 50, 75]]))
            .await
        {
            Ok(v) => v,
            Err(CoreError::PermanentRemote(msg)) => {
                warn!(%msg, "eth_feeHistory unsupported, falling back to legacy fees");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let base_fees = result["baseFeePerGas"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let Some(base_fee) = base_fees.last().and_then(|v| parse_u256(v).ok()) else {
            return Ok(None);
        };
        let priority = result["reward"]
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.as_array())
            .and_then(|fees| {
                let pick = if fees.len() > 1 { &fees[1] } else { fees.first()? };
                parse_u256(pick).ok()
            })
            .unwrap_or_else(|| U256::from(1_000_000_000u64));

        Ok(Some(FeeHistoryQuote {
            base_fee,
            max_priority_fee: priority,
            max_fee: base_fee * 2 + priority,
        }))
    }

    async fn estimate_gas(
        &self,
        from: &EthAddress,
        to: &EthAddress,
        value: U256,
        data: Option<&str>,
    ) -> CoreResult<u64> {
        let mut tx = json!({
            "from": from.as_str(),
            "to": to.as_str(),
            "value": format!("0x{value:x}"),
        });
        if let Some(data) = data {
            tx["data"] = json!(data);
        }
        parse_quantity(&self.call("eth_estimateGas", json!([tx])).await?)
    }

    async fn pending_nonce(&self, address: &EthAddress) -> CoreResult<u64> {
        parse_quantity(
            &self
                .call(
                    "eth_getTransactionCount",
                    json!([address.as_str(), "pending"]),
                )
                .await?,
        )
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> CoreResult<String> {
        let result = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::PermanentRemote("sendRawTransaction: non-string hash".into()))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> CoreResult<Option<Receipt>> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(Receipt {
            status: parse_quantity(&result["status"]).ok(),
            block_number: parse_quantity(&result["blockNumber"]).ok(),
            gas_used: parse_quantity(&result["gasUsed"]).ok(),
            effective_gas_price: parse_u256(&result["effectiveGasPrice"]).ok(),
        }))
    }
}
