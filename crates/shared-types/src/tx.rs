//! Transaction requests, the status state machine, and approvals.

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::entities::EthAddress;

/// Lifecycle status of an outbound transaction request.
///
/// The machine is append-only history: every mutation of a request's status
/// goes through the guard in the orchestrator, which consults
/// [`legal_successors`] and refuses anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Submitted,
    PolicyEvalPending,
    PolicyBlocked,
    KytPending,
    KytSkipped,
    KytReview,
    KytBlocked,
    ApprovalPending,
    ApprovalSkipped,
    Rejected,
    SignPending,
    Signed,
    FailedSign,
    BroadcastPending,
    Broadcasted,
    FailedBroadcast,
    Confirming,
    Confirmed,
    Finalized,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "SUBMITTED",
            Self::PolicyEvalPending => "POLICY_EVAL_PENDING",
            Self::PolicyBlocked => "POLICY_BLOCKED",
            Self::KytPending => "KYT_PENDING",
            Self::KytSkipped => "KYT_SKIPPED",
            Self::KytReview => "KYT_REVIEW",
            Self::KytBlocked => "KYT_BLOCKED",
            Self::ApprovalPending => "APPROVAL_PENDING",
            Self::ApprovalSkipped => "APPROVAL_SKIPPED",
            Self::Rejected => "REJECTED",
            Self::SignPending => "SIGN_PENDING",
            Self::Signed => "SIGNED",
            Self::FailedSign => "FAILED_SIGN",
            Self::BroadcastPending => "BROADCAST_PENDING",
            Self::Broadcasted => "BROADCASTED",
            Self::FailedBroadcast => "FAILED_BROADCAST",
            Self::Confirming => "CONFIRMING",
            Self::Confirmed => "CONFIRMED",
            Self::Finalized => "FINALIZED",
        };
        f.write_str(s)
    }
}

/// Legal successors for each status.
///
/// `FAILED_BROADCAST -> BROADCAST_PENDING` is the only non-terminal cycle
/// (bounded re-broadcast). `CONFIRMING -> FAILED_BROADCAST` covers the
/// reverted-on-chain receipt, which is a semantic failure, not transport.
pub fn legal_successors(status: TxStatus) -> &'static [TxStatus] {
    use TxStatus::*;
    match status {
        Submitted => &[PolicyEvalPending],
        PolicyEvalPending => &[PolicyBlocked, KytPending, KytSkipped],
        KytPending => &[KytBlocked, KytReview, ApprovalPending, ApprovalSkipped],
        KytSkipped => &[ApprovalPending, ApprovalSkipped],
        KytReview => &[KytBlocked, ApprovalPending, ApprovalSkipped],
        ApprovalPending => &[Rejected, SignPending],
        ApprovalSkipped => &[SignPending],
        SignPending => &[Signed, FailedSign],
        Signed => &[BroadcastPending],
        BroadcastPending => &[Broadcasted, FailedBroadcast],
        FailedBroadcast => &[BroadcastPending],
        Broadcasted => &[Confirming],
        Confirming => &[Confirmed, FailedBroadcast],
        Confirmed => &[Finalized],
        PolicyBlocked | KytBlocked | Rejected | FailedSign | Finalized => &[],
    }
}

impl TxStatus {
    /// Whether `self -> to` is present in the legal-successor table.
    pub fn can_transition_to(self, to: TxStatus) -> bool {
        legal_successors(self).contains(&to)
    }

    /// Terminal states admit no successor.
    pub fn is_terminal(self) -> bool {
        legal_successors(self).is_empty()
    }
}

/// An outbound transfer request and its full control history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxRequest {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub to_address: EthAddress,
    pub asset: String,
    pub amount_wei: U256,
    /// Calldata for contract calls, hex-encoded.
    pub data: Option<String>,
    pub status: TxStatus,
    /// Snapshot of the policy evaluation, stored verbatim for explainability.
    pub policy_result: Option<Value>,
    pub kyt_result: Option<crate::kyt::Verdict>,
    pub kyt_case_id: Option<Uuid>,
    pub requires_approval: bool,
    pub required_approvals: u32,
    /// Raw signed transaction, hex-encoded. Immutable once set.
    pub signed_tx: Option<String>,
    pub tx_hash: Option<String>,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<U256>,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub created_by: Uuid,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TxRequest {
    /// A fresh request in `SUBMITTED`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallet_id: Uuid,
        to_address: EthAddress,
        asset: String,
        amount_wei: U256,
        data: Option<String>,
        created_by: Uuid,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            to_address,
            asset,
            amount_wei,
            data,
            status: TxStatus::Submitted,
            policy_result: None,
            kyt_result: None,
            kyt_case_id: None,
            requires_approval: false,
            required_approvals: 0,
            signed_tx: None,
            tx_hash: None,
            nonce: None,
            gas_limit: None,
            gas_price: None,
            block_number: None,
            confirmations: 0,
            created_by,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Vote on a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => f.write_str("APPROVED"),
            Self::Rejected => f.write_str("REJECTED"),
        }
    }
}

/// One user's vote on one request. `(tx_request_id, user_id)` is unique and
/// the request creator never appears here (segregation of duties).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub tx_request_id: Uuid,
    pub user_id: Uuid,
    pub decision: ApprovalDecision,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Approval {
    pub fn new(
        tx_request_id: Uuid,
        user_id: Uuid,
        decision: ApprovalDecision,
        comment: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx_request_id,
            user_id,
            decision,
            comment,
            created_at: Utc::now(),
        }
    }
}
