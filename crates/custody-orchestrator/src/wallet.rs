//! Wallet registry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_mpc::DkgCompletion;
use custody_store::{AuditStore, WalletStore};
use shared_types::{
    AuditEventType, CoreError, CoreResult, EthAddress, Wallet, WalletStatus, WalletType,
};

/// Creates and mutates wallets. Wallets are never deleted; key generation,
/// role changes, and administrative suspension are the only mutations.
pub struct WalletRegistry<S> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
}

impl<S: WalletStore + AuditStore> WalletRegistry<S> {
    pub fn new(store: Arc<S>, audit: Arc<AuditService<S>>) -> Self {
        Self { store, audit }
    }

    /// A LOCAL_KEY wallet, active immediately at the signer's address.
    pub async fn create_local_wallet(
        &self,
        wallet_type: WalletType,
        signer_address: EthAddress,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<Wallet> {
        let wallet = Wallet::new_local(wallet_type, signer_address);
        self.store.insert_wallet(wallet.clone()).await?;
        self.audit
            .log(
                AuditRecord::system(AuditEventType::WalletCreated, correlation_id)
                    .actor(actor_id)
                    .entity("WALLET", wallet.id)
                    .payload(json!({
                        "wallet_type": wallet.wallet_type,
                        "custody_backend": wallet.custody_backend,
                        "address": wallet.address.as_ref().map(|a| a.as_str()),
                    })),
            )
            .await?;
        info!(wallet = %wallet.id, "local-key wallet created");
        Ok(wallet)
    }

    /// An MPC wallet in `PENDING_KEYGEN`; no address until DKG completes.
    pub async fn create_mpc_wallet(
        &self,
        wallet_type: WalletType,
        threshold_t: u16,
        total_n: u16,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<Wallet> {
        if threshold_t == 0 || threshold_t > total_n {
            return Err(CoreError::Configuration(format!(
                "invalid threshold {threshold_t}-of-{total_n}"
            )));
        }
        let wallet = Wallet::new_mpc(wallet_type, threshold_t, total_n);
        self.store.insert_wallet(wallet.clone()).await?;
        self.audit
            .log(
                AuditRecord::system(AuditEventType::WalletCreated, correlation_id)
                    .actor(actor_id)
                    .entity("WALLET", wallet.id)
                    .payload(json!({
                        "wallet_type": wallet.wallet_type,
                        "custody_backend": wallet.custody_backend,
                        "threshold": format!("{threshold_t}-of-{total_n}"),
                    })),
            )
            .await?;
        info!(wallet = %wallet.id, "mpc wallet created, awaiting keygen");
        Ok(wallet)
    }

    /// Activate a pending wallet from a finished DKG: address, status, and
    /// keyset reference land in one update.
    pub async fn finalize_keygen(
        &self,
        wallet_id: Uuid,
        completion: &DkgCompletion,
    ) -> CoreResult<Wallet> {
        let mut wallet = self
            .store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "wallet",
                id: wallet_id.to_string(),
            })?;
        if wallet.status != WalletStatus::PendingKeygen {
            return Err(CoreError::Conflict(format!(
                "wallet {wallet_id} is not awaiting key generation"
            )));
        }

        wallet.address = Some(EthAddress::parse(&completion.ethereum_address)?);
        wallet.mpc_keyset_ref = Some(completion.keyset_ref.clone());
        wallet.status = WalletStatus::Active;
        wallet.updated_at = Utc::now();
        self.store.update_wallet(wallet.clone()).await?;
        info!(
            wallet = %wallet.id,
            address = %completion.ethereum_address,
            "mpc wallet activated"
        );
        Ok(wallet)
    }

    /// Administrative suspension; a suspended wallet accepts no transfers
    /// and is dropped from deposit monitoring.
    pub async fn suspend(
        &self,
        wallet_id: Uuid,
        actor_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<Wallet> {
        let mut wallet = self
            .store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "wallet",
                id: wallet_id.to_string(),
            })?;
        wallet.status = WalletStatus::Suspended;
        wallet.updated_at = Utc::now();
        self.store.update_wallet(wallet.clone()).await?;

        self.audit
            .log(
                AuditRecord::user(AuditEventType::WalletSuspended, correlation_id, actor_id)
                    .entity("WALLET", wallet_id)
                    .payload(json!({"status": wallet.status})),
            )
            .await?;
        Ok(wallet)
    }

    pub async fn wallet(&self, id: Uuid) -> CoreResult<Option<Wallet>> {
        self.store.wallet(id).await
    }

    pub async fn list(&self) -> CoreResult<Vec<Wallet>> {
        self.store.list_wallets().await
    }
}
