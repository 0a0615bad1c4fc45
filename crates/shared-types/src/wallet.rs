//! Wallet entity, custody lifecycle, and per-wallet volume counters.

use chrono::{DateTime, NaiveDate, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::EthAddress;

/// Business role of a wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletType {
    Retail,
    Treasury,
    Ops,
    Settlement,
}

/// Where the signing key material lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyBackend {
    /// A locally-held key; signing is synchronous inside the core.
    LocalKey,
    /// Threshold ECDSA across remote signer nodes; the core never holds
    /// key material and only issues signing permits.
    MpcTecdsa,
}

/// Wallet lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    /// Distributed key generation has not completed; no address yet.
    PendingKeygen,
    Active,
    Suspended,
    Archived,
}

/// A custody wallet.
///
/// Invariant: `address` is set iff `status != PENDING_KEYGEN`, and an
/// MPC wallet carries `mpc_keyset_ref` once activated. Wallets are never
/// deleted; suspension and archival are the only exits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub address: Option<EthAddress>,
    pub wallet_type: WalletType,
    pub custody_backend: CustodyBackend,
    pub status: WalletStatus,
    /// Keyset URI, e.g. `mpc-tecdsa://default/<keyset_id>`.
    pub mpc_keyset_ref: Option<String>,
    pub mpc_threshold_t: Option<u16>,
    pub mpc_total_n: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// A local-key wallet, active immediately at the signer's address.
    pub fn new_local(wallet_type: WalletType, address: EthAddress) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            address: Some(address),
            wallet_type,
            custody_backend: CustodyBackend::LocalKey,
            status: WalletStatus::Active,
            mpc_keyset_ref: None,
            mpc_threshold_t: None,
            mpc_total_n: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An MPC wallet awaiting key generation. No address until DKG
    /// completion activates it.
    pub fn new_mpc(wallet_type: WalletType, threshold_t: u16, total_n: u16) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            address: None,
            wallet_type,
            custody_backend: CustodyBackend::MpcTecdsa,
            status: WalletStatus::PendingKeygen,
            mpc_keyset_ref: None,
            mpc_threshold_t: Some(threshold_t),
            mpc_total_n: Some(total_n),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-wallet, per-day, per-asset outbound volume. Incremented exactly once
/// per `FINALIZED` transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DailyVolume {
    pub wallet_id: Uuid,
    pub date: NaiveDate,
    pub asset: String,
    pub total_amount: U256,
    pub tx_count: u64,
}
