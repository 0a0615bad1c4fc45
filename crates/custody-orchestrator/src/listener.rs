//! Chain listener: confirmations and inbound deposit detection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use primitive_types::U256;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_chain::{BlockTx, ChainRpc};
use custody_mpc::SignerNode;
use custody_screener::{RiskOracle, ScreeningService};
use custody_store::Store;
use shared_types::{ActorType, AuditEventType, CoreConfig, CoreResult, Deposit, TxStatus};

use crate::service::Orchestrator;

/// A single cooperative task that wakes on a configured interval.
///
/// Each tick: (a) push every CONFIRMING request through the confirmation
/// check; (b) scan a bounded window of new blocks for transfers into
/// monitored addresses, recording each as a PENDING_ADMIN deposit and
/// screening the sender. RPC failures skip the tick; they never stop the
/// loop. Shutdown is cooperative via a watch flag observed between ticks.
pub struct ChainListener<S, C, O, N> {
    orchestrator: Arc<Orchestrator<S, C, O, N>>,
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
    screening: Arc<ScreeningService<S, O>>,
    chain: Arc<C>,
    config: CoreConfig,
    last_processed: Mutex<Option<u64>>,
    shutdown: watch::Receiver<bool>,
}

impl<S, C, O, N> ChainListener<S, C, O, N>
where
    S: Store + Send + Sync + 'static,
    C: ChainRpc,
    O: RiskOracle,
    N: SignerNode + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Arc<Orchestrator<S, C, O, N>>,
        store: Arc<S>,
        audit: Arc<AuditService<S>>,
        screening: Arc<ScreeningService<S, O>>,
        chain: Arc<C>,
        config: CoreConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            audit,
            screening,
            chain,
            config,
            last_processed: Mutex::new(None),
            shutdown,
        }
    }

    /// Run until the shutdown flag flips.
    pub async fn run(mut self) {
        info!("chain listener started");
        let interval = Duration::from_secs(self.config.chain_listener_poll_interval_seconds);
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            if let Err(err) = self.tick().await {
                warn!(%err, "listener tick failed, skipping");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.changed() => {}
            }
        }
        info!("chain listener stopped");
    }

    /// One poll iteration; public so tests and manual triggers can drive
    /// it without the timer.
    pub async fn tick(&self) -> CoreResult<()> {
        self.check_confirmations().await;
        self.scan_deposits().await
    }

    async fn check_confirmations(&self) {
        let confirming = match self.store.txs_by_status(TxStatus::Confirming).await {
            Ok(txs) => txs,
            Err(err) => {
                warn!(%err, "could not list confirming requests");
                return;
            }
        };
        for tx in confirming {
            let correlation_id = format!("chain-listener-{}", Uuid::new_v4());
            if let Err(err) = self
                .orchestrator
                .check_confirmation(tx.id, &correlation_id)
                .await
            {
                warn!(tx = %tx.id, %err, "confirmation check failed");
            }
        }
    }

    async fn scan_deposits(&self) -> CoreResult<()> {
        let head = match self.chain.block_number().await {
            Ok(head) => head,
            Err(err) => {
                warn!(%err, "chain head unavailable, skipping deposit scan");
                return Ok(());
            }
        };

        let mut last_guard = self.last_processed.lock().await;
        let last = last_guard.unwrap_or_else(|| head.saturating_sub(self.config.deposit_scan_max_blocks));
        if head <= last {
            return Ok(());
        }
        let from = last + 1;
        let to = (last + self.config.deposit_scan_max_blocks).min(head);

        let monitored: HashSet<String> = self
            .store
            .monitored_addresses()
            .await?
            .into_iter()
            .map(|a| a.as_str().to_string())
            .collect();
        if monitored.is_empty() {
            *last_guard = Some(to);
            return Ok(());
        }

        for number in from..=to {
            let block = match self.chain.block_with_txs(number).await {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(err) => {
                    warn!(number, %err, "block fetch failed, will retry this window");
                    return Ok(());
                }
            };
            for block_tx in &block.transactions {
                let Some(to_addr) = &block_tx.to else { continue };
                if block_tx.value > U256::zero() && monitored.contains(to_addr.as_str()) {
                    if let Err(err) = self.process_deposit(block_tx, number).await {
                        warn!(tx_hash = %block_tx.hash, %err, "deposit processing failed");
                    }
                }
            }
        }
        *last_guard = Some(to);
        Ok(())
    }

    async fn process_deposit(&self, block_tx: &BlockTx, block_number: u64) -> CoreResult<()> {
        let (Some(to), Some(from)) = (&block_tx.to, &block_tx.from) else {
            return Ok(());
        };
        let Some(wallet) = self.store.wallet_by_address(to).await? else {
            return Ok(());
        };

        let mut deposit = Deposit::detected(
            wallet.id,
            block_tx.hash.clone(),
            from.clone(),
            block_tx.value,
            block_number,
        );
        if !self.store.insert_deposit_if_new(deposit.clone()).await? {
            // Already seen on an earlier scan of this window.
            return Ok(());
        }

        let correlation_id = format!("deposit-{}", Uuid::new_v4());
        self.audit
            .log(
                AuditRecord::system(AuditEventType::DepositDetected, &correlation_id)
                    .actor_type(ActorType::ChainListener)
                    .entity("WALLET", wallet.id)
                    .payload(json!({
                        "deposit_id": deposit.id.to_string(),
                        "tx_hash": block_tx.hash,
                        "from_address": from.as_str(),
                        "amount_wei": block_tx.value.to_string(),
                        "block_number": block_number,
                    })),
            )
            .await?;

        let (verdict, case) = self
            .screening
            .evaluate_inbound(from, wallet.id, &block_tx.hash, &correlation_id)
            .await?;
        deposit.kyt_result = Some(verdict);
        deposit.kyt_case_id = case.map(|c| c.id);
        self.store.update_deposit(deposit.clone()).await?;

        info!(
            deposit = %deposit.id,
            wallet = %wallet.id,
            amount = %block_tx.value,
            ?verdict,
            "deposit detected, awaiting administrative action"
        );
        Ok(())
    }
}
