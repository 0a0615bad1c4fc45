//! Signing permits and MPC session bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Who approved, how many, against what requirement. Frozen into the permit.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    pub count: u32,
    pub required: u32,
    pub approvers: Vec<Uuid>,
}

/// One-shot, TTL-bounded authorization to sign exactly one transaction hash.
///
/// The content fields bind the signature to the full decision graph that
/// produced it: the control snapshots, the approval set, and an anchor into
/// the audit chain as of issuance. `permit_hash` is SHA-256 over the
/// canonical serialization of the content; `signature` is HMAC-SHA-256 of
/// `permit_hash` under the core's internal permit key. `is_used` moves
/// false→true exactly once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningPermit {
    pub id: Uuid,
    pub tx_request_id: Uuid,
    pub wallet_id: Uuid,
    /// Keyset reference for MPC wallets; the local signer label otherwise.
    pub keyset_id: String,
    /// The exact 32-byte digest the signer is authorized to sign, hex.
    pub tx_hash: String,
    pub kyt_result: String,
    pub kyt_snapshot: Value,
    pub policy_result: String,
    pub policy_snapshot: Value,
    pub approval_snapshot: ApprovalSnapshot,
    /// Hash of the most recent audit event at issuance. Opaque commitment;
    /// reference-by-value only, no structural sharing with the audit log.
    pub audit_anchor_hash: String,
    pub permit_hash: String,
    pub signature: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub is_used: bool,
    pub is_revoked: bool,
}

/// ECDSA signature components as produced by the threshold protocol.
/// `v` is 27 or 28 (recovery parity); EIP-155 adjustment happens at
/// transaction assembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

/// Kind of multi-round session against the signer nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    Dkg,
    Signing,
}

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Timeout,
}

/// Error taxonomy for remote signer interactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Network timeout or node unreachable; round delivery may be retried
    /// a bounded number of times.
    Transient,
    /// Invalid permit, hash mismatch, bad parameters; the session terminates.
    Permanent,
    /// Malformed or semantically invalid share; the session terminates and
    /// the offending node is quarantined.
    ProtocolViolation,
}
