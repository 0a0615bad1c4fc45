//! Repository traits (driven ports) for the custody core.
//!
//! Services are generic over these traits; the in-memory adapter in
//! `memory.rs` implements all of them, and a relational adapter would too.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use primitive_types::U256;
use uuid::Uuid;

use shared_types::{
    AddressBookEntry, Approval, AuditEvent, CaseStatus, CoreResult, DailyVolume, Deposit,
    Direction, EthAddress, Group, KytCase, PolicySet, SigningPermit, TxRequest, TxStatus, Wallet,
};

/// Wallet registry persistence.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn insert_wallet(&self, wallet: Wallet) -> CoreResult<()>;
    async fn wallet(&self, id: Uuid) -> CoreResult<Option<Wallet>>;
    async fn wallet_by_address(&self, address: &EthAddress) -> CoreResult<Option<Wallet>>;
    /// Full-row replace; `NotFound` if the wallet does not exist.
    async fn update_wallet(&self, wallet: Wallet) -> CoreResult<()>;
    async fn list_wallets(&self) -> CoreResult<Vec<Wallet>>;
    /// Addresses of active wallets, for the chain listener's deposit scan.
    async fn monitored_addresses(&self) -> CoreResult<Vec<EthAddress>>;
}

/// Transaction-request persistence with idempotency-key deduplication.
#[async_trait]
pub trait TxStore: Send + Sync {
    /// Create a request. If `tx.idempotency_key` is set and already present,
    /// the existing row is returned unchanged (`created = false`) regardless
    /// of the incoming payload. Key check and insert share one critical
    /// section.
    async fn create_tx(&self, tx: TxRequest) -> CoreResult<(TxRequest, bool)>;
    async fn tx(&self, id: Uuid) -> CoreResult<Option<TxRequest>>;
    /// Full-row replace; `NotFound` if absent.
    async fn update_tx(&self, tx: TxRequest) -> CoreResult<()>;
    async fn txs_by_status(&self, status: TxStatus) -> CoreResult<Vec<TxRequest>>;
    /// Sum of `amount_wei` over FINALIZED requests of a wallet.
    async fn finalized_total(&self, wallet_id: Uuid) -> CoreResult<U256>;
}

/// Approval votes. `(tx_request_id, user_id)` is unique.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// `Conflict` if the user already voted on this request.
    async fn insert_approval(&self, approval: Approval) -> CoreResult<()>;
    async fn approvals_for(&self, tx_request_id: Uuid) -> CoreResult<Vec<Approval>>;
}

/// Policy sets and their group assignments.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn insert_policy_set(&self, set: PolicySet) -> CoreResult<()>;
    async fn policy_set(&self, id: Uuid) -> CoreResult<Option<PolicySet>>;
    async fn update_policy_set(&self, set: PolicySet) -> CoreResult<()>;
    /// Highest existing version for a set name; 0 when the name is new.
    async fn max_version(&self, name: &str) -> CoreResult<u32>;
    /// The active policy set assigned to a group, rules loaded.
    async fn active_set_for_group(&self, group_id: Uuid) -> CoreResult<Option<PolicySet>>;
    /// Point the group at a policy set (replacing any prior assignment).
    async fn assign_policy(&self, group_id: Uuid, policy_set_id: Uuid) -> CoreResult<()>;
}

/// Groups, memberships, and per-group address books.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn insert_group(&self, group: Group) -> CoreResult<()>;
    async fn group(&self, id: Uuid) -> CoreResult<Option<Group>>;
    async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> CoreResult<()>;
    async fn groups_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Group>>;
    async fn default_group(&self) -> CoreResult<Option<Group>>;

    /// Insert or update an entry keyed by `(group_id, address)`.
    async fn upsert_address_entry(&self, entry: AddressBookEntry) -> CoreResult<()>;
    /// Returns whether an entry was removed.
    async fn remove_address_entry(&self, group_id: Uuid, address: &EthAddress)
        -> CoreResult<bool>;
    async fn address_entry(
        &self,
        group_id: Uuid,
        address: &EthAddress,
    ) -> CoreResult<Option<AddressBookEntry>>;
    async fn list_address_entries(&self, group_id: Uuid) -> CoreResult<Vec<AddressBookEntry>>;
}

/// Screening review cases.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn insert_case(&self, case: KytCase) -> CoreResult<()>;
    async fn case(&self, id: Uuid) -> CoreResult<Option<KytCase>>;
    async fn update_case(&self, case: KytCase) -> CoreResult<()>;
    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        direction: Option<Direction>,
    ) -> CoreResult<Vec<KytCase>>;
}

/// Inbound deposits. `tx_hash` is the dedup key across listener re-scans.
#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Insert unless a deposit with the same `tx_hash` exists. Returns
    /// whether a row was created.
    async fn insert_deposit_if_new(&self, deposit: Deposit) -> CoreResult<bool>;
    async fn deposit(&self, id: Uuid) -> CoreResult<Option<Deposit>>;
    async fn update_deposit(&self, deposit: Deposit) -> CoreResult<()>;
    async fn list_deposits(&self, wallet_id: Option<Uuid>) -> CoreResult<Vec<Deposit>>;
    /// Sum of `amount_wei` over CREDITED deposits of a wallet: the
    /// withdrawable ledger balance for MPC custody.
    async fn credited_total(&self, wallet_id: Uuid) -> CoreResult<U256>;
}

/// Signing permits with single-shot consumption.
#[async_trait]
pub trait PermitStore: Send + Sync {
    async fn insert_permit(&self, permit: SigningPermit) -> CoreResult<()>;
    async fn permit(&self, id: Uuid) -> CoreResult<Option<SigningPermit>>;
    /// The unused, unrevoked permit for a request, if any.
    async fn open_permit_for_tx(&self, tx_request_id: Uuid) -> CoreResult<Option<SigningPermit>>;
    /// Flip `is_used` false→true exactly once; `PermitInvalid` if it was
    /// already used or revoked. Check and write share one critical section.
    async fn consume_permit(&self, id: Uuid, used_at: DateTime<Utc>) -> CoreResult<SigningPermit>;
    async fn revoke_permit(&self, id: Uuid) -> CoreResult<()>;
    async fn permits_for_tx(&self, tx_request_id: Uuid) -> CoreResult<Vec<SigningPermit>>;
}

/// The append-only audit log.
///
/// The store enforces density: an appended event's `sequence_number` must be
/// exactly `last + 1` (1 for the first event). Hash computation and chain
/// linkage are the audit service's job.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, event: AuditEvent) -> CoreResult<()>;
    async fn last_audit(&self) -> CoreResult<Option<AuditEvent>>;
    async fn audit_by_sequence(&self, sequence_number: u64) -> CoreResult<Option<AuditEvent>>;
    /// Events with `from <= sequence_number <= to`, ascending.
    async fn audit_range(&self, from: Option<u64>, to: Option<u64>) -> CoreResult<Vec<AuditEvent>>;
    async fn audit_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<AuditEvent>>;
}

/// Daily outbound volume counters.
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Add one finalized transfer to the `(wallet, date, asset)` bucket.
    async fn add_volume(
        &self,
        wallet_id: Uuid,
        date: NaiveDate,
        asset: &str,
        amount_wei: U256,
    ) -> CoreResult<()>;
    async fn volume(
        &self,
        wallet_id: Uuid,
        date: NaiveDate,
        asset: &str,
    ) -> CoreResult<Option<DailyVolume>>;
}

/// Everything a fully-wired core needs from persistence.
pub trait Store:
    WalletStore
    + TxStore
    + ApprovalStore
    + PolicyStore
    + GroupStore
    + CaseStore
    + DepositStore
    + PermitStore
    + AuditStore
    + VolumeStore
{
}

impl<T> Store for T where
    T: WalletStore
        + TxStore
        + ApprovalStore
        + PolicyStore
        + GroupStore
        + CaseStore
        + DepositStore
        + PermitStore
        + AuditStore
        + VolumeStore
{
}
