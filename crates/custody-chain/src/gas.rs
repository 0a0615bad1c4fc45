//! Gas quoting and estimation.

use primitive_types::U256;
use tracing::warn;

use shared_types::{CoreResult, EthAddress};

use crate::rpc::ChainRpc;

/// Fee data for one signing attempt. Legacy price is always present; the
/// EIP-1559 fields are recorded when the node supports the probe.
#[derive(Clone, Copy, Debug)]
pub struct GasQuote {
    pub legacy_gas_price: U256,
    pub base_fee: Option<U256>,
    pub max_priority_fee: Option<U256>,
    pub max_fee: Option<U256>,
}

/// Stateless helper over the RPC port.
pub struct GasOracle;

impl GasOracle {
    /// Quote fees: try `eth_feeHistory`, fall back to legacy only.
    pub async fn quote<C: ChainRpc>(rpc: &C) -> CoreResult<GasQuote> {
        let legacy_gas_price = rpc.gas_price().await?;
        match rpc.fee_history().await {
            Ok(Some(fees)) => Ok(GasQuote {
                legacy_gas_price,
                base_fee: Some(fees.base_fee),
                max_priority_fee: Some(fees.max_priority_fee),
                max_fee: Some(fees.max_fee),
            }),
            Ok(None) => Ok(GasQuote {
                legacy_gas_price,
                base_fee: None,
                max_priority_fee: None,
                max_fee: None,
            }),
            Err(err) => {
                warn!(%err, "fee history probe failed, using legacy gas price");
                Ok(GasQuote {
                    legacy_gas_price,
                    base_fee: None,
                    max_priority_fee: None,
                    max_fee: None,
                })
            }
        }
    }

    /// Estimate gas with a 20% buffer. An estimation failure degrades to
    /// the standard transfer cost (or a contract-call default with data).
    pub async fn estimate<C: ChainRpc>(
        rpc: &C,
        from: &EthAddress,
        to: &EthAddress,
        value: U256,
        data: Option<&str>,
    ) -> u64 {
        match rpc.estimate_gas(from, to, value, data).await {
            Ok(estimate) => estimate + estimate / 5,
            Err(err) => {
                warn!(%err, "gas estimation failed, using default");
                if data.is_some() {
                    100_000
                } else {
                    21_000
                }
            }
        }
    }
}
