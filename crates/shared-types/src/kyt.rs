//! Screening verdicts, review cases, and inbound deposits.

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::entities::EthAddress;

/// Outcome of address/transaction screening.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Review,
    Block,
    /// Remote provider unreachable and the fallback flag permitted passing.
    /// Treated as ALLOW by the pipeline but recorded prominently.
    Unchecked,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allow => "ALLOW",
            Self::Review => "REVIEW",
            Self::Block => "BLOCK",
            Self::Unchecked => "UNCHECKED",
        };
        f.write_str(s)
    }
}

/// Direction of the screened movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Lifecycle of a review case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Pending,
    ResolvedAllow,
    ResolvedBlock,
}

/// A screening case opened for human adjudication.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KytCase {
    pub id: Uuid,
    pub address: EthAddress,
    pub direction: Direction,
    pub reason: String,
    pub status: CaseStatus,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl KytCase {
    pub fn new(address: EthAddress, direction: Direction, reason: String, status: CaseStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            direction,
            reason,
            status,
            resolved_by: None,
            resolved_at: None,
            resolution_comment: None,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of an inbound deposit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    /// Detected on-chain, awaiting explicit administrative action.
    PendingAdmin,
    /// Credited to the withdrawable ledger balance.
    Credited,
    Rejected,
}

/// An inbound transfer detected by the chain listener.
///
/// Only `CREDITED` deposits count toward an MPC wallet's withdrawable
/// balance; detection alone credits nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Uuid,
    pub wallet_id: Uuid,
    /// On-chain transaction hash. Unique; the dedup key for re-scans.
    pub tx_hash: String,
    pub from_address: EthAddress,
    pub asset: String,
    pub amount_wei: U256,
    pub block_number: u64,
    pub kyt_result: Option<Verdict>,
    pub kyt_case_id: Option<Uuid>,
    pub status: DepositStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl Deposit {
    pub fn detected(
        wallet_id: Uuid,
        tx_hash: String,
        from_address: EthAddress,
        amount_wei: U256,
        block_number: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            tx_hash,
            from_address,
            asset: "ETH".to_string(),
            amount_wei,
            block_number,
            kyt_result: None,
            kyt_case_id: None,
            status: DepositStatus::PendingAdmin,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            detected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Unchecked.to_string(), "UNCHECKED");
        assert_eq!(Verdict::Block.to_string(), "BLOCK");
    }

    #[test]
    fn test_new_deposit_is_pending_admin() {
        let from = EthAddress::parse("0xaa00000000000000000000000000000000000001").unwrap();
        let d = Deposit::detected(Uuid::new_v4(), "0xabc".into(), from, U256::from(7u64), 100);
        assert_eq!(d.status, DepositStatus::PendingAdmin);
        assert!(d.kyt_result.is_none());
    }
}
