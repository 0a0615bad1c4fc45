//! Synchronous signer for LOCAL_KEY custody.

use shared_crypto::{signed_tx_payload, signing_digest, EcdsaKeyPair, LegacyTxFields};
use shared_types::{CoreError, CoreResult, EthAddress};

/// A locally-held signing key.
///
/// Development and ops wallets only; production retail custody runs on the
/// threshold backend where no full key exists anywhere.
pub struct LocalSigner {
    keypair: EcdsaKeyPair,
    address: EthAddress,
}

impl LocalSigner {
    pub fn from_hex_key(raw: &str) -> CoreResult<Self> {
        let keypair = EcdsaKeyPair::from_hex(raw)
            .map_err(|e| CoreError::Configuration(format!("local signer key: {e}")))?;
        let address = EthAddress::parse(&keypair.address())
            .map_err(|_| CoreError::Configuration("local signer address derivation".into()))?;
        Ok(Self { keypair, address })
    }

    /// The signer's address (lowercase form).
    pub fn address(&self) -> &EthAddress {
        &self.address
    }

    /// The digest this signer would sign for the given fields.
    pub fn digest(&self, fields: &LegacyTxFields) -> [u8; 32] {
        signing_digest(fields)
    }

    /// Sign and assemble. Returns `(raw_bytes, tx_hash_hex)`.
    pub fn sign(&self, fields: &LegacyTxFields) -> CoreResult<(Vec<u8>, String)> {
        let digest = signing_digest(fields);
        let sig = self
            .keypair
            .sign_prehash(&digest)
            .map_err(|e| CoreError::PermanentRemote(format!("local signing failed: {e}")))?;
        Ok(signed_tx_payload(fields, &sig))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use shared_crypto::recover_address;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn fields() -> LegacyTxFields {
        LegacyTxFields {
            nonce: 0,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: 21_000,
            to: [0xbb; 20],
            value: U256::from(1u64),
            data: vec![],
            chain_id: 11_155_111,
        }
    }

    #[test]
    fn test_signature_recovers_to_signer() {
        let signer = LocalSigner::from_hex_key(DEV_KEY).unwrap();
        let fields = fields();
        let digest = signer.digest(&fields);

        let sig = signer.keypair.sign_prehash(&digest).unwrap();
        let recovered = recover_address(&digest, &sig).unwrap();
        assert_eq!(recovered.to_lowercase(), signer.address().as_str());
    }

    #[test]
    fn test_sign_produces_prefixed_hash() {
        let signer = LocalSigner::from_hex_key(DEV_KEY).unwrap();
        let (raw, tx_hash) = signer.sign(&fields()).unwrap();
        assert!(!raw.is_empty());
        assert!(tx_hash.starts_with("0x"));
        assert_eq!(tx_hash.len(), 66);
    }

    #[test]
    fn test_rejects_malformed_key() {
        assert!(LocalSigner::from_hex_key("0x1234").is_err());
    }
}
