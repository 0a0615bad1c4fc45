//! Append-only audit events with hash-chain linkage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Every auditable event kind in the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    // Wallet lifecycle
    WalletCreated,
    WalletSuspended,

    // Outbound transaction lifecycle
    TxRequestCreated,
    TxStatusChanged,
    TxPolicyEvaluated,
    TxKytEvaluated,
    KytSkipped,
    ApprovalsSkipped,
    TxApprovalReceived,
    TxRejectionReceived,
    TxSigned,
    TxBroadcasted,
    TxConfirmed,
    TxFinalized,
    TxFailed,

    // Screening cases
    KytCaseCreated,
    KytCaseResolved,

    // Inbound deposits
    DepositDetected,
    DepositKytEvaluated,
    DepositApproved,
    DepositRejected,

    // Policy administration
    PolicySetCreated,
    PolicyRuleAdded,
    PolicySetAssigned,
    AddressBookEntryAdded,
    AddressBookEntryRemoved,

    // MPC / signing
    MpcKeygenStarted,
    MpcKeygenCompleted,
    MpcKeygenFailed,
    MpcSignStarted,
    MpcSignCompleted,
    MpcSignFailed,
    SignPermitIssued,
    SignPermitRejected,
    MpcNodeQuarantined,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SCREAMING_SNAKE_CASE, same as the serde form.
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

/// Who caused an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    User,
    System,
    ChainListener,
}

/// One immutable audit record.
///
/// `sequence_number` is dense and strictly increasing across the whole
/// system. `hash` covers the canonical serialization of the identifying
/// fields plus `prev_hash`, chaining each event to its predecessor; events
/// are never updated or deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub payload: Option<Value>,
    pub correlation_id: String,
    /// Hash of the event at `sequence_number - 1`; `None` only for the
    /// first event in the chain.
    pub prev_hash: Option<String>,
    /// SHA-256 over the canonical JSON of the hashed fields, hex.
    pub hash: String,
}
