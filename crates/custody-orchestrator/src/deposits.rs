//! Administrative crediting and rejection of inbound deposits.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, DepositStore};
use shared_types::{AuditEventType, CoreError, CoreResult, Deposit, DepositStatus};

/// Explicit human decisions over detected deposits. Detection never
/// credits; only an administrator moves a deposit out of `PENDING_ADMIN`,
/// and only `CREDITED` deposits count toward the withdrawable balance.
pub struct DepositAdmin<S> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
}

impl<S: DepositStore + AuditStore> DepositAdmin<S> {
    pub fn new(store: Arc<S>, audit: Arc<AuditService<S>>) -> Self {
        Self { store, audit }
    }

    async fn pending_deposit(&self, deposit_id: Uuid) -> CoreResult<Deposit> {
        let deposit = self
            .store
            .deposit(deposit_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "deposit",
                id: deposit_id.to_string(),
            })?;
        if deposit.status != DepositStatus::PendingAdmin {
            return Err(CoreError::Conflict(format!(
                "deposit {deposit_id} was already adjudicated"
            )));
        }
        Ok(deposit)
    }

    /// Credit a pending deposit into the wallet's withdrawable balance.
    pub async fn credit(
        &self,
        deposit_id: Uuid,
        admin_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<Deposit> {
        let mut deposit = self.pending_deposit(deposit_id).await?;
        deposit.status = DepositStatus::Credited;
        deposit.approved_by = Some(admin_id);
        deposit.approved_at = Some(Utc::now());
        self.store.update_deposit(deposit.clone()).await?;

        self.audit
            .log(
                AuditRecord::user(AuditEventType::DepositApproved, correlation_id, admin_id)
                    .entity("DEPOSIT", deposit_id)
                    .payload(json!({
                        "wallet_id": deposit.wallet_id.to_string(),
                        "tx_hash": deposit.tx_hash,
                        "amount_wei": deposit.amount_wei.to_string(),
                    })),
            )
            .await?;
        info!(deposit = %deposit_id, wallet = %deposit.wallet_id, "deposit credited");
        Ok(deposit)
    }

    /// Reject a pending deposit; the funds never become withdrawable.
    pub async fn reject(
        &self,
        deposit_id: Uuid,
        admin_id: Uuid,
        reason: &str,
        correlation_id: &str,
    ) -> CoreResult<Deposit> {
        let mut deposit = self.pending_deposit(deposit_id).await?;
        deposit.status = DepositStatus::Rejected;
        deposit.rejected_by = Some(admin_id);
        deposit.rejected_at = Some(Utc::now());
        deposit.rejection_reason = Some(reason.to_string());
        self.store.update_deposit(deposit.clone()).await?;

        self.audit
            .log(
                AuditRecord::user(AuditEventType::DepositRejected, correlation_id, admin_id)
                    .entity("DEPOSIT", deposit_id)
                    .payload(json!({
                        "wallet_id": deposit.wallet_id.to_string(),
                        "tx_hash": deposit.tx_hash,
                        "reason": reason,
                    })),
            )
            .await?;
        Ok(deposit)
    }

    pub async fn list(&self, wallet_id: Option<Uuid>) -> CoreResult<Vec<Deposit>> {
        self.store.list_deposits(wallet_id).await
    }
}
