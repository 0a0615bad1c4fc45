//! Transaction building from request fields.

use primitive_types::U256;

use shared_crypto::LegacyTxFields;
use shared_types::{CoreError, CoreResult, EthAddress};

/// Assemble the unsigned legacy fields for one request.
///
/// `data` is the optional hex calldata from the request; the asset decides
/// whether `amount_wei` rides in `value` (base asset) or stays zero
/// (token transfers move value inside calldata).
pub fn build_tx_fields(
    to: &EthAddress,
    asset: &str,
    amount_wei: U256,
    data: Option<&str>,
    nonce: u64,
    gas_price: U256,
    gas_limit: u64,
    chain_id: u64,
) -> CoreResult<LegacyTxFields> {
    let value = if asset.eq_ignore_ascii_case("ETH") {
        amount_wei
    } else {
        U256::zero()
    };
    let data = match data {
        Some(raw) => {
            let stripped = raw.trim().trim_start_matches("0x");
            if stripped.is_empty() {
                Vec::new()
            } else {
                hex::decode(stripped)
                    .map_err(|e| CoreError::Configuration(format!("invalid calldata hex: {e}")))?
            }
        }
        None => Vec::new(),
    };
    Ok(LegacyTxFields {
        nonce,
        gas_price,
        gas_limit,
        to: to.to_bytes(),
        value,
        data,
        chain_id,
    })
}
