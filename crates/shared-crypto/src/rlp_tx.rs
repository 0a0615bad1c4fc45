//! Legacy (EIP-155) transaction encoding.
//!
//! Signing digest: `keccak256(RLP([nonce, gasPrice, gas, to, value, data,
//! chainId, 0, 0]))`. Signed payload: `RLP([nonce, gasPrice, gas, to,
//! value, data, v', r, s])` with `v' = chainId * 2 + 35 + recovery_id`.

use primitive_types::U256;
use rlp::RlpStream;

use crate::ecdsa::RecoverableSignature;
use crate::keccak::keccak256;

/// The unsigned fields of a legacy transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyTxFields {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: U256,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// EIP-155 recovery encoding from the protocol-level `v` (27 or 28).
pub fn eip155_v(chain_id: u64, v: u8) -> u64 {
    chain_id * 2 + 35 + (v as u64 - 27)
}

/// The 32-byte digest a signer must sign for these fields.
pub fn signing_digest(tx: &LegacyTxFields) -> [u8; 32] {
    let mut stream = RlpStream::new_list(9);
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    stream.append(&tx.to.to_vec());
    stream.append(&tx.value);
    stream.append(&tx.data);
    stream.append(&tx.chain_id);
    stream.append(&0u8);
    stream.append(&0u8);
    keccak256(&stream.out())
}

/// Assemble the signed raw transaction and its hash from a recoverable
/// signature over [`signing_digest`]. Returns `(raw_bytes, tx_hash_hex)`.
pub fn signed_tx_payload(tx: &LegacyTxFields, sig: &RecoverableSignature) -> (Vec<u8>, String) {
    let v = eip155_v(tx.chain_id, sig.v);
    let r = U256::from_big_endian(&sig.r);
    let s = U256::from_big_endian(&sig.s);

    let mut stream = RlpStream::new_list(9);
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    stream.append(&tx.to.to_vec());
    stream.append(&tx.value);
    stream.append(&tx.data);
    stream.append(&v);
    stream.append(&r);
    stream.append(&s);

    let raw = stream.out().to_vec();
    let tx_hash = format!("0x{}", hex::encode(keccak256(&raw)));
    (raw, tx_hash)
}
