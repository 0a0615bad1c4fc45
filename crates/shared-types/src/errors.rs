//! The workspace-wide error sum type.
//!
//! Every fallible operation in the core returns `CoreResult<T>`. Transport
//! layers map `CoreError` variants onto their own response codes; the core
//! never panics on a domain failure.

use thiserror::Error;

use crate::tx::TxStatus;

/// Result alias used across all custody crates.
pub type CoreResult<T> = Result<T, CoreError>;

/// Reason a signing permit was refused by a consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermitRejection {
    /// The permit was already consumed by a prior signing.
    AlreadyUsed,
    /// The permit was administratively or automatically revoked.
    Revoked,
    /// The permit's TTL elapsed before consumption.
    Expired,
    /// The hash in the signing request differs from the permitted hash.
    TxHashMismatch,
    /// The HMAC over the permit hash did not verify.
    BadSignature,
}

impl std::fmt::Display for PermitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyUsed => write!(f, "permit already used"),
            Self::Revoked => write!(f, "permit revoked"),
            Self::Expired => write!(f, "permit expired"),
            Self::TxHashMismatch => write!(f, "tx_hash mismatch"),
            Self::BadSignature => write!(f, "invalid permit signature"),
        }
    }
}

impl PermitRejection {
    /// Stable error code recorded in audit payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyUsed => "PERMIT_USED",
            Self::Revoked => "PERMIT_REVOKED",
            Self::Expired => "PERMIT_EXPIRED",
            Self::TxHashMismatch => "PERMIT_HASH_MISMATCH",
            Self::BadSignature => "PERMIT_BAD_SIGNATURE",
        }
    }
}

/// All error kinds produced by the custody core.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A state-machine move not present in the legal-successor table.
    /// The request row is left untouched.
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: TxStatus, to: TxStatus },

    /// Unknown request, wallet, case, permit, or other entity.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or segregation-of-duties violation; no write performed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A signing permit failed validation. Fatal for the signing attempt.
    #[error("permit invalid: {0}")]
    PermitInvalid(PermitRejection),

    /// A remote dependency (chain RPC, screening provider, signer node) was
    /// unreachable or timed out. The caller decides whether to retry.
    #[error("transient remote failure: {0}")]
    TransientRemote(String),

    /// A remote dependency answered with an unrecoverable outcome
    /// (reverted transaction, unrecoverable signer error).
    #[error("permanent remote failure: {0}")]
    PermanentRemote(String),

    /// A signer node produced a malformed or semantically impossible
    /// response. The session terminates and the node is quarantined.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Missing or inconsistent operator configuration. Surfaced loudly,
    /// never silently degraded.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization of hashed or persisted material failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Stable machine-readable code included in terminal audit payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::PermitInvalid(r) => r.code(),
            Self::TransientRemote(_) => "TRANSIENT_REMOTE",
            Self::PermanentRemote(_) => "PERMANENT_REMOTE",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// True for failures the caller may retry without operator involvement.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRemote(_))
    }
}
