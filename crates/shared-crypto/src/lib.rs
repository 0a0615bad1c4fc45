//! # Shared Crypto
//!
//! Hashing, MAC, and Ethereum signature primitives for the custody core.
//!
//! ## Contents
//!
//! - `hashing` - SHA-256 and canonical-JSON digests (audit chain, policy
//!   snapshots, permit hashes, audit packages)
//! - `keccak` - Keccak-256, address derivation, EIP-55 checksum casing
//! - `mac` - HMAC-SHA-256 issue + constant-time verification (permits)
//! - `rlp_tx` - legacy EIP-155 transaction encoding (signing digest and
//!   signed payload assembly)
//! - `ecdsa` - recoverable secp256k1 signatures (local signer, signature
//!   assembly from threshold protocol output)
//!
//! Everything here is a pure function or a small value type; no I/O, no
//! entity knowledge.

pub mod ecdsa;
pub mod errors;
pub mod hashing;
pub mod keccak;
pub mod mac;
pub mod rlp_tx;

pub use ecdsa::{recover_address, EcdsaKeyPair, RecoverableSignature};
pub use errors::CryptoError;
pub use hashing::{canonical_json_sha256, sha256, sha256_hex};
pub use keccak::{eip55_checksum, keccak256, pubkey_to_address};
pub use mac::{hmac_sha256, hmac_verify};
pub use rlp_tx::{eip155_v, signed_tx_payload, signing_digest, LegacyTxFields};
