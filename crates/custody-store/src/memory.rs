//! In-memory reference adapter for all persistence ports.
//!
//! A single `tokio::sync::RwLock` guards the whole state: each method body
//! is one critical section, which is what gives the check-then-insert
//! contracts (idempotency keys, one vote per user, permit consumption,
//! audit-sequence density) their atomicity.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use primitive_types::U256;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_types::{
    AddressBookEntry, Approval, AuditEvent, CaseStatus, CoreError, CoreResult, DailyVolume,
    Deposit, DepositStatus, Direction, EthAddress, Group, KytCase, PermitRejection, PolicySet,
    SigningPermit, TxRequest, TxStatus, Wallet, WalletStatus,
};

use crate::ports::*;

#[derive(Default)]
struct Inner {
    wallets: HashMap<Uuid, Wallet>,
    txs: HashMap<Uuid, TxRequest>,
    tx_order: Vec<Uuid>,
    idempotency: HashMap<String, Uuid>,
    approvals: Vec<Approval>,
    policy_sets: HashMap<Uuid, PolicySet>,
    group_policy: HashMap<Uuid, Uuid>,
    groups: HashMap<Uuid, Group>,
    memberships: Vec<(Uuid, Uuid)>,
    address_books: HashMap<(Uuid, String), AddressBookEntry>,
    cases: HashMap<Uuid, KytCase>,
    case_order: Vec<Uuid>,
    deposits: HashMap<Uuid, Deposit>,
    deposit_by_hash: HashMap<String, Uuid>,
    permits: HashMap<Uuid, SigningPermit>,
    permit_order: Vec<Uuid>,
    audit: Vec<AuditEvent>,
    volumes: HashMap<(Uuid, NaiveDate, String), DailyVolume>,
}

/// In-memory store implementing every repository port.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored audit event in place.
    ///
    /// Tamper-injection hook for chain-verification tests; not part of any
    /// store port and absent from production adapters.
    pub async fn overwrite_audit_event(&self, sequence_number: u64, event: AuditEvent) -> bool {
        let mut inner = self.inner.write().await;
        match inner
            .audit
            .iter_mut()
            .find(|e| e.sequence_number == sequence_number)
        {
            Some(slot) => {
                *slot = event;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn insert_wallet(&self, wallet: Wallet) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn wallet(&self, id: Uuid) -> CoreResult<Option<Wallet>> {
        Ok(self.inner.read().await.wallets.get(&id).cloned())
    }

    async fn wallet_by_address(&self, address: &EthAddress) -> CoreResult<Option<Wallet>> {
        Ok(self
            .inner
            .read()
            .await
            .wallets
            .values()
            .find(|w| w.address.as_ref() == Some(address))
            .cloned())
    }

    async fn update_wallet(&self, wallet: Wallet) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.wallets.contains_key(&wallet.id) {
            return Err(CoreError::NotFound {
                entity: "wallet",
                id: wallet.id.to_string(),
            });
        }
        inner.wallets.insert(wallet.id, wallet);
        Ok(())
    }

    async fn list_wallets(&self) -> CoreResult<Vec<Wallet>> {
        let inner = self.inner.read().await;
        let mut wallets: Vec<Wallet> = inner.wallets.values().cloned().collect();
        wallets.sort_by_key(|w| w.created_at);
        Ok(wallets)
    }

    async fn monitored_addresses(&self) -> CoreResult<Vec<EthAddress>> {
        let inner = self.inner.read().await;
        Ok(inner
            .wallets
            .values()
            .filter(|w| w.status == WalletStatus::Active)
            .filter_map(|w| w.address.clone())
            .collect())
    }
}

#[async_trait]
impl TxStore for MemoryStore {
    async fn create_tx(&self, tx: TxRequest) -> CoreResult<(TxRequest, bool)> {
        let mut inner = self.inner.write().await;
        if let Some(key) = &tx.idempotency_key {
            if let Some(existing_id) = inner.idempotency.get(key) {
                let existing = inner
                    .txs
                    .get(existing_id)
                    .cloned()
                    .ok_or_else(|| CoreError::NotFound {
                        entity: "tx_request",
                        id: existing_id.to_string(),
                    })?;
                return Ok((existing, false));
            }
            inner.idempotency.insert(key.clone(), tx.id);
        }
        inner.tx_order.push(tx.id);
        inner.txs.insert(tx.id, tx.clone());
        Ok((tx, true))
    }

    async fn tx(&self, id: Uuid) -> CoreResult<Option<TxRequest>> {
        Ok(self.inner.read().await.txs.get(&id).cloned())
    }

    async fn update_tx(&self, tx: TxRequest) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.txs.contains_key(&tx.id) {
            return Err(CoreError::NotFound {
                entity: "tx_request",
                id: tx.id.to_string(),
            });
        }
        inner.txs.insert(tx.id, tx);
        Ok(())
    }

    async fn txs_by_status(&self, status: TxStatus) -> CoreResult<Vec<TxRequest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tx_order
            .iter()
            .filter_map(|id| inner.txs.get(id))
            .filter(|tx| tx.status == status)
            .cloned()
            .collect())
    }

    async fn finalized_total(&self, wallet_id: Uuid) -> CoreResult<U256> {
        let inner = self.inner.read().await;
        let mut total = U256::zero();
        for tx in inner.txs.values() {
            if tx.wallet_id == wallet_id && tx.status == TxStatus::Finalized {
                total = total.saturating_add(tx.amount_wei);
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn insert_approval(&self, approval: Approval) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .approvals
            .iter()
            .any(|a| a.tx_request_id == approval.tx_request_id && a.user_id == approval.user_id);
        if duplicate {
            return Err(CoreError::Conflict(format!(
                "user {} already voted on request {}",
                approval.user_id, approval.tx_request_id
            )));
        }
        inner.approvals.push(approval);
        Ok(())
    }

    async fn approvals_for(&self, tx_request_id: Uuid) -> CoreResult<Vec<Approval>> {
        let inner = self.inner.read().await;
        Ok(inner
            .approvals
            .iter()
            .filter(|a| a.tx_request_id == tx_request_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn insert_policy_set(&self, set: PolicySet) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let clash = inner
            .policy_sets
            .values()
            .any(|s| s.name == set.name && s.version == set.version);
        if clash {
            return Err(CoreError::Conflict(format!(
                "policy set {} v{} already exists",
                set.name, set.version
            )));
        }
        inner.policy_sets.insert(set.id, set);
        Ok(())
    }

    async fn policy_set(&self, id: Uuid) -> CoreResult<Option<PolicySet>> {
        Ok(self.inner.read().await.policy_sets.get(&id).cloned())
    }

    async fn update_policy_set(&self, set: PolicySet) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.policy_sets.contains_key(&set.id) {
            return Err(CoreError::NotFound {
                entity: "policy_set",
                id: set.id.to_string(),
            });
        }
        inner.policy_sets.insert(set.id, set);
        Ok(())
    }

    async fn max_version(&self, name: &str) -> CoreResult<u32> {
        let inner = self.inner.read().await;
        Ok(inner
            .policy_sets
            .values()
            .filter(|s| s.name == name)
            .map(|s| s.version)
            .max()
            .unwrap_or(0))
    }

    async fn active_set_for_group(&self, group_id: Uuid) -> CoreResult<Option<PolicySet>> {
        let inner = self.inner.read().await;
        let Some(set_id) = inner.group_policy.get(&group_id) else {
            return Ok(None);
        };
        Ok(inner
            .policy_sets
            .get(set_id)
            .filter(|s| s.is_active)
            .cloned())
    }

    async fn assign_policy(&self, group_id: Uuid, policy_set_id: Uuid) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.policy_sets.contains_key(&policy_set_id) {
            return Err(CoreError::NotFound {
                entity: "policy_set",
                id: policy_set_id.to_string(),
            });
        }
        inner.group_policy.insert(group_id, policy_set_id);
        Ok(())
    }
}

#[async_trait]
impl GroupStore for MemoryStore {
    async fn insert_group(&self, group: Group) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if group.is_default && inner.groups.values().any(|g| g.is_default) {
            return Err(CoreError::Conflict("a default group already exists".into()));
        }
        inner.groups.insert(group.id, group);
        Ok(())
    }

    async fn group(&self, id: Uuid) -> CoreResult<Option<Group>> {
        Ok(self.inner.read().await.groups.get(&id).cloned())
    }

    async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.groups.contains_key(&group_id) {
            return Err(CoreError::NotFound {
                entity: "group",
                id: group_id.to_string(),
            });
        }
        if !inner.memberships.contains(&(group_id, user_id)) {
            inner.memberships.push((group_id, user_id));
        }
        Ok(())
    }

    async fn groups_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Group>> {
        let inner = self.inner.read().await;
        Ok(inner
            .memberships
            .iter()
            .filter(|(_, uid)| *uid == user_id)
            .filter_map(|(gid, _)| inner.groups.get(gid))
            .cloned()
            .collect())
    }

    async fn default_group(&self) -> CoreResult<Option<Group>> {
        let inner = self.inner.read().await;
        Ok(inner.groups.values().find(|g| g.is_default).cloned())
    }

    async fn upsert_address_entry(&self, entry: AddressBookEntry) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = (entry.group_id, entry.address.as_str().to_string());
        inner.address_books.insert(key, entry);
        Ok(())
    }

    async fn remove_address_entry(
        &self,
        group_id: Uuid,
        address: &EthAddress,
    ) -> CoreResult<bool> {
        let mut inner = self.inner.write().await;
        let key = (group_id, address.as_str().to_string());
        Ok(inner.address_books.remove(&key).is_some())
    }

    async fn address_entry(
        &self,
        group_id: Uuid,
        address: &EthAddress,
    ) -> CoreResult<Option<AddressBookEntry>> {
        let inner = self.inner.read().await;
        let key = (group_id, address.as_str().to_string());
        Ok(inner.address_books.get(&key).cloned())
    }

    async fn list_address_entries(&self, group_id: Uuid) -> CoreResult<Vec<AddressBookEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<AddressBookEntry> = inner
            .address_books
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.address.as_str().cmp(b.address.as_str()));
        Ok(entries)
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn insert_case(&self, case: KytCase) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.case_order.push(case.id);
        inner.cases.insert(case.id, case);
        Ok(())
    }

    async fn case(&self, id: Uuid) -> CoreResult<Option<KytCase>> {
        Ok(self.inner.read().await.cases.get(&id).cloned())
    }

    async fn update_case(&self, case: KytCase) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.cases.contains_key(&case.id) {
            return Err(CoreError::NotFound {
                entity: "kyt_case",
                id: case.id.to_string(),
            });
        }
        inner.cases.insert(case.id, case);
        Ok(())
    }

    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        direction: Option<Direction>,
    ) -> CoreResult<Vec<KytCase>> {
        let inner = self.inner.read().await;
        Ok(inner
            .case_order
            .iter()
            .filter_map(|id| inner.cases.get(id))
            .filter(|c| status.map_or(true, |s| c.status == s))
            .filter(|c| direction.map_or(true, |d| c.direction == d))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn insert_deposit_if_new(&self, deposit: Deposit) -> CoreResult<bool> {
        let mut inner = self.inner.write().await;
        if inner.deposit_by_hash.contains_key(&deposit.tx_hash) {
            return Ok(false);
        }
        inner
            .deposit_by_hash
            .insert(deposit.tx_hash.clone(), deposit.id);
        inner.deposits.insert(deposit.id, deposit);
        Ok(true)
    }

    async fn deposit(&self, id: Uuid) -> CoreResult<Option<Deposit>> {
        Ok(self.inner.read().await.deposits.get(&id).cloned())
    }

    async fn update_deposit(&self, deposit: Deposit) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.deposits.contains_key(&deposit.id) {
            return Err(CoreError::NotFound {
                entity: "deposit",
                id: deposit.id.to_string(),
            });
        }
        inner.deposits.insert(deposit.id, deposit);
        Ok(())
    }

    async fn list_deposits(&self, wallet_id: Option<Uuid>) -> CoreResult<Vec<Deposit>> {
        let inner = self.inner.read().await;
        let mut deposits: Vec<Deposit> = inner
            .deposits
            .values()
            .filter(|d| wallet_id.map_or(true, |w| d.wallet_id == w))
            .cloned()
            .collect();
        deposits.sort_by_key(|d| d.detected_at);
        Ok(deposits)
    }

    async fn credited_total(&self, wallet_id: Uuid) -> CoreResult<U256> {
        let inner = self.inner.read().await;
        let mut total = U256::zero();
        for deposit in inner.deposits.values() {
            if deposit.wallet_id == wallet_id && deposit.status == DepositStatus::Credited {
                total = total.saturating_add(deposit.amount_wei);
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl PermitStore for MemoryStore {
    async fn insert_permit(&self, permit: SigningPermit) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.permit_order.push(permit.id);
        inner.permits.insert(permit.id, permit);
        Ok(())
    }

    async fn permit(&self, id: Uuid) -> CoreResult<Option<SigningPermit>> {
        Ok(self.inner.read().await.permits.get(&id).cloned())
    }

    async fn open_permit_for_tx(&self, tx_request_id: Uuid) -> CoreResult<Option<SigningPermit>> {
        let inner = self.inner.read().await;
        Ok(inner
            .permit_order
            .iter()
            .rev()
            .filter_map(|id| inner.permits.get(id))
            .find(|p| p.tx_request_id == tx_request_id && !p.is_used && !p.is_revoked)
            .cloned())
    }

    async fn consume_permit(&self, id: Uuid, used_at: DateTime<Utc>) -> CoreResult<SigningPermit> {
        let mut inner = self.inner.write().await;
        let permit = inner.permits.get_mut(&id).ok_or_else(|| CoreError::NotFound {
            entity: "signing_permit",
            id: id.to_string(),
        })?;
        if permit.is_used {
            return Err(CoreError::PermitInvalid(PermitRejection::AlreadyUsed));
        }
        if permit.is_revoked {
            return Err(CoreError::PermitInvalid(PermitRejection::Revoked));
        }
        permit.is_used = true;
        permit.used_at = Some(used_at);
        Ok(permit.clone())
    }

    async fn revoke_permit(&self, id: Uuid) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let permit = inner.permits.get_mut(&id).ok_or_else(|| CoreError::NotFound {
            entity: "signing_permit",
            id: id.to_string(),
        })?;
        permit.is_revoked = true;
        Ok(())
    }

    async fn permits_for_tx(&self, tx_request_id: Uuid) -> CoreResult<Vec<SigningPermit>> {
        let inner = self.inner.read().await;
        Ok(inner
            .permit_order
            .iter()
            .filter_map(|id| inner.permits.get(id))
            .filter(|p| p.tx_request_id == tx_request_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, event: AuditEvent) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let expected = inner.audit.last().map(|e| e.sequence_number + 1).unwrap_or(1);
        if event.sequence_number != expected {
            return Err(CoreError::Conflict(format!(
                "audit sequence gap: expected {expected}, got {}",
                event.sequence_number
            )));
        }
        inner.audit.push(event);
        Ok(())
    }

    async fn last_audit(&self) -> CoreResult<Option<AuditEvent>> {
        Ok(self.inner.read().await.audit.last().cloned())
    }

    async fn audit_by_sequence(&self, sequence_number: u64) -> CoreResult<Option<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .find(|e| e.sequence_number == sequence_number)
            .cloned())
    }

    async fn audit_range(&self, from: Option<u64>, to: Option<u64>) -> CoreResult<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .filter(|e| from.map_or(true, |f| e.sequence_number >= f))
            .filter(|e| to.map_or(true, |t| e.sequence_number <= t))
            .cloned()
            .collect())
    }

    async fn audit_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> CoreResult<Vec<AuditEvent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .audit
            .iter()
            .filter(|e| {
                e.entity_type.as_deref() == Some(entity_type)
                    && e.entity_id.as_deref() == Some(entity_id)
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VolumeStore for MemoryStore {
    async fn add_volume(
        &self,
        wallet_id: Uuid,
        date: NaiveDate,
        asset: &str,
        amount_wei: U256,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .volumes
            .entry((wallet_id, date, asset.to_string()))
            .or_insert_with(|| DailyVolume {
                wallet_id,
                date,
                asset: asset.to_string(),
                total_amount: U256::zero(),
                tx_count: 0,
            });
        entry.total_amount = entry.total_amount.saturating_add(amount_wei);
        entry.tx_count += 1;
        Ok(())
    }

    async fn volume(
        &self,
        wallet_id: Uuid,
        date: NaiveDate,
        asset: &str,
    ) -> CoreResult<Option<DailyVolume>> {
        let inner = self.inner.read().await;
        Ok(inner
            .volumes
            .get(&(wallet_id, date, asset.to_string()))
            .cloned())
    }
}
