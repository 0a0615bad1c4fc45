//! Crypto error types.

use thiserror::Error;

/// Failures from the crypto helpers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("signing failed")]
    SigningFailed,

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("canonical serialization failed: {0}")]
    Canonical(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),
}
