//! The transaction orchestrator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use primitive_types::U256;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_chain::{broadcast_with_retry, build_tx_fields, ChainRpc, GasOracle, LocalSigner, NonceManager};
use custody_mpc::coordinator::SessionStarted;
use custody_mpc::permit::{PermitContent, PermitService};
use custody_mpc::{MpcCoordinator, SignerNode};
use custody_policy::PolicyEngine;
use custody_screener::{RiskOracle, ScreeningService};
use custody_store::Store;
use shared_crypto::{recover_address, signed_tx_payload, signing_digest, RecoverableSignature};
use shared_types::{
    ApprovalDecision, ApprovalSnapshot, AuditEventType, CaseStatus, CoreConfig, CoreError,
    CoreResult, CustodyBackend, EthAddress, SigningSignature, TxRequest, TxStatus, Verdict,
    Wallet, WalletStatus,
};

/// Submission payload from the transport layer.
#[derive(Clone, Debug)]
pub struct CreateTxRequest {
    pub wallet_id: Uuid,
    pub to_address: EthAddress,
    pub asset: String,
    pub amount_wei: U256,
    pub data: Option<String>,
}

/// Drives every request through the legal lifecycle. The single entry
/// point for all business events; nothing else mutates `TxRequest.status`.
pub struct Orchestrator<S, C, O, N> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
    engine: PolicyEngine<S>,
    screening: Arc<ScreeningService<S, O>>,
    chain: Arc<C>,
    nonces: NonceManager,
    permits: Arc<PermitService<S>>,
    coordinator: Arc<MpcCoordinator<S, N>>,
    local_signer: Option<LocalSigner>,
    config: CoreConfig,
}

impl<S, C, O, N> Orchestrator<S, C, O, N>
where
    S: Store + Send + Sync + 'static,
    C: ChainRpc,
    O: RiskOracle,
    N: SignerNode + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        audit: Arc<AuditService<S>>,
        engine: PolicyEngine<S>,
        screening: Arc<ScreeningService<S, O>>,
        chain: Arc<C>,
        permits: Arc<PermitService<S>>,
        coordinator: Arc<MpcCoordinator<S, N>>,
        config: CoreConfig,
    ) -> CoreResult<Self> {
        let local_signer = match &config.local_signer_private_key {
            Some(key) => Some(LocalSigner::from_hex_key(key)?),
            None => None,
        };
        Ok(Self {
            store,
            audit,
            engine,
            screening,
            chain,
            nonces: NonceManager::new(),
            permits,
            coordinator,
            local_signer,
            config,
        })
    }

    pub fn screening(&self) -> &Arc<ScreeningService<S, O>> {
        &self.screening
    }

    pub fn coordinator(&self) -> &Arc<MpcCoordinator<S, N>> {
        &self.coordinator
    }

    // === Guarded transition primitive ===

    /// The only way a request changes state: verify the move is legal,
    /// persist it, and emit `TX_STATUS_CHANGED` carrying old and new.
    async fn transition(
        &self,
        tx: &mut TxRequest,
        to: TxStatus,
        actor_id: Option<Uuid>,
        extra: Option<Value>,
        correlation_id: &str,
    ) -> CoreResult<()> {
        if !tx.status.can_transition_to(to) {
            warn!(tx = %tx.id, from = %tx.status, %to, "illegal transition refused");
            return Err(CoreError::IllegalTransition {
                from: tx.status,
                to,
            });
        }

        let old = tx.status;
        tx.status = to;
        tx.updated_at = Utc::now();
        self.store.update_tx(tx.clone()).await?;

        let mut payload = Map::new();
        payload.insert("old_status".into(), json!(old));
        payload.insert("new_status".into(), json!(to));
        if let Some(Value::Object(extra)) = extra {
            payload.extend(extra);
        }
        self.audit
            .log(
                AuditRecord::system(AuditEventType::TxStatusChanged, correlation_id)
                    .actor(actor_id)
                    .entity("TX_REQUEST", tx.id)
                    .payload(Value::Object(payload)),
            )
            .await?;
        info!(tx = %tx.id, from = %old, to = %to, "status changed");
        Ok(())
    }

    async fn load_tx(&self, tx_request_id: Uuid) -> CoreResult<TxRequest> {
        self.store
            .tx(tx_request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "tx_request",
                id: tx_request_id.to_string(),
            })
    }

    async fn load_wallet(&self, wallet_id: Uuid) -> CoreResult<Wallet> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "wallet",
                id: wallet_id.to_string(),
            })
    }

    // === Submit ===

    /// Create a request and run it through the pipeline until it blocks,
    /// waits on a human, or (local custody) completes signing and
    /// broadcast.
    pub async fn create(
        &self,
        input: CreateTxRequest,
        created_by: Uuid,
        correlation_id: &str,
        idempotency_key: Option<String>,
    ) -> CoreResult<TxRequest> {
        let wallet = self.load_wallet(input.wallet_id).await?;
        if wallet.status != WalletStatus::Active {
            return Err(CoreError::Conflict(format!(
                "wallet {} is not active",
                wallet.id
            )));
        }

        // Only credited deposits are withdrawable under threshold custody.
        if wallet.custody_backend == CustodyBackend::MpcTecdsa {
            let available = self.store.credited_total(wallet.id).await?;
            if input.amount_wei > available {
                return Err(CoreError::Conflict(format!(
                    "insufficient balance: available {available} wei, requested {} wei",
                    input.amount_wei
                )));
            }
        }

        let draft = TxRequest::new(
            input.wallet_id,
            input.to_address,
            input.asset,
            input.amount_wei,
            input.data,
            created_by,
            idempotency_key,
        );
        let (mut tx, created) = self.store.create_tx(draft).await?;
        if !created {
            // Idempotent replay: hand back the original row untouched.
            return Ok(tx);
        }

        self.audit
            .log(
                AuditRecord::user(AuditEventType::TxRequestCreated, correlation_id, created_by)
                    .entity("TX_REQUEST", tx.id)
                    .payload(json!({
                        "wallet_id": tx.wallet_id.to_string(),
                        "to_address": tx.to_address.as_str(),
                        "asset": tx.asset,
                        "amount_wei": tx.amount_wei.to_string(),
                    })),
            )
            .await?;

        self.process_policy(&mut tx, &wallet, created_by, correlation_id)
            .await?;
        self.load_tx(tx.id).await
    }

    // === Policy step ===

    async fn process_policy(
        &self,
        tx: &mut TxRequest,
        wallet: &Wallet,
        actor_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.transition(tx, TxStatus::PolicyEvalPending, Some(actor_id), None, correlation_id)
            .await?;

        let result = self
            .engine
            .evaluate(
                tx.created_by,
                &tx.to_address,
                tx.amount_wei,
                &tx.asset,
                wallet,
                Some(tx.id),
                correlation_id,
            )
            .await?;

        // Full snapshot retained on the row for explainability.
        tx.policy_result = Some(
            serde_json::to_value(&result).map_err(|e| CoreError::Serialization(e.to_string()))?,
        );
        tx.requires_approval = result.approval_required;
        tx.required_approvals = result.approval_count;
        self.store.update_tx(tx.clone()).await?;

        if !result.allowed {
            self.transition(
                tx,
                TxStatus::PolicyBlocked,
                Some(actor_id),
                Some(json!({
                    "blocked_by": result.matched_rules,
                    "reason": result.reasons.first(),
                    "address_status": result.address_status,
                })),
                correlation_id,
            )
            .await?;
            return Ok(());
        }

        if result.kyt_required {
            self.process_kyt(tx, wallet, actor_id, correlation_id).await
        } else {
            self.transition(tx, TxStatus::KytSkipped, Some(actor_id), None, correlation_id)
                .await?;
            self.audit
                .log(
                    AuditRecord::system(AuditEventType::KytSkipped, correlation_id)
                        .actor(Some(actor_id))
                        .entity("TX_REQUEST", tx.id)
                        .payload(json!({
                            "reason": "Policy rule does not require KYT",
                            "matched_rules": result.matched_rules,
                            "policy_version": result.policy_version,
                        })),
                )
                .await?;
            self.process_approval_gate(tx, wallet, Some(actor_id), correlation_id)
                .await
        }
    }

    // === KYT step ===

    async fn process_kyt(
        &self,
        tx: &mut TxRequest,
        wallet: &Wallet,
        actor_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.transition(tx, TxStatus::KytPending, Some(actor_id), None, correlation_id)
            .await?;

        let (verdict, case) = self
            .screening
            .evaluate_outbound(&tx.to_address, tx.id, Some(actor_id), correlation_id)
            .await?;
        tx.kyt_result = Some(verdict);
        tx.kyt_case_id = case.as_ref().map(|c| c.id);
        self.store.update_tx(tx.clone()).await?;

        match verdict {
            Verdict::Block => {
                self.transition(tx, TxStatus::KytBlocked, Some(actor_id), None, correlation_id)
                    .await
            }
            Verdict::Review => {
                // Halted until an operator resolves the case.
                self.transition(tx, TxStatus::KytReview, Some(actor_id), None, correlation_id)
                    .await
            }
            Verdict::Allow | Verdict::Unchecked => {
                self.process_approval_gate(tx, wallet, Some(actor_id), correlation_id)
                    .await
            }
        }
    }

    // === Approval gate ===

    async fn process_approval_gate(
        &self,
        tx: &mut TxRequest,
        wallet: &Wallet,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<()> {
        if tx.requires_approval && tx.required_approvals > 0 {
            return self
                .transition(tx, TxStatus::ApprovalPending, actor_id, None, correlation_id)
                .await;
        }

        self.transition(tx, TxStatus::ApprovalSkipped, actor_id, None, correlation_id)
            .await?;
        self.audit
            .log(
                AuditRecord::system(AuditEventType::ApprovalsSkipped, correlation_id)
                    .actor(actor_id)
                    .entity("TX_REQUEST", tx.id)
                    .payload(json!({"reason": "Policy rule does not require approval"})),
            )
            .await?;
        self.process_signing(tx, wallet, actor_id, correlation_id).await
    }

    /// Record one vote. Binds: the voter is not the creator, has not voted
    /// before, and the request is actually waiting on approvals. Any
    /// rejection is terminal; reaching the required count issues the
    /// permit and moves to signing.
    pub async fn approve(
        &self,
        tx_request_id: Uuid,
        user_id: Uuid,
        decision: ApprovalDecision,
        comment: Option<String>,
        correlation_id: &str,
    ) -> CoreResult<(TxRequest, shared_types::Approval)> {
        let mut tx = self.load_tx(tx_request_id).await?;
        if tx.status != TxStatus::ApprovalPending {
            return Err(CoreError::Conflict(format!(
                "request {tx_request_id} is not pending approval"
            )));
        }
        if tx.created_by == user_id {
            return Err(CoreError::Conflict(
                "segregation of duties: the request creator cannot approve it".to_string(),
            ));
        }

        let approval = shared_types::Approval::new(tx.id, user_id, decision, comment.clone());
        self.store.insert_approval(approval.clone()).await?;

        let event_type = match decision {
            ApprovalDecision::Approved => AuditEventType::TxApprovalReceived,
            ApprovalDecision::Rejected => AuditEventType::TxRejectionReceived,
        };
        self.audit
            .log(
                AuditRecord::user(event_type, correlation_id, user_id)
                    .entity("TX_REQUEST", tx.id)
                    .payload(json!({"decision": decision, "comment": comment})),
            )
            .await?;

        match decision {
            ApprovalDecision::Rejected => {
                self.transition(&mut tx, TxStatus::Rejected, Some(user_id), None, correlation_id)
                    .await?;
            }
            ApprovalDecision::Approved => {
                let votes = self.store.approvals_for(tx.id).await?;
                let approved = votes
                    .iter()
                    .filter(|a| a.decision == ApprovalDecision::Approved)
                    .count() as u32;
                if approved >= tx.required_approvals {
                    let wallet = self.load_wallet(tx.wallet_id).await?;
                    self.process_signing(&mut tx, &wallet, Some(user_id), correlation_id)
                        .await?;
                }
            }
        }
        Ok((self.load_tx(tx.id).await?, approval))
    }

    /// Re-enter the pipeline after a human resolved the KYT case.
    pub async fn resolve_kyt(
        &self,
        tx_request_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<TxRequest> {
        let mut tx = self.load_tx(tx_request_id).await?;
        if tx.status != TxStatus::KytReview {
            return Err(CoreError::Conflict(format!(
                "request {tx_request_id} is not in KYT review"
            )));
        }
        let case_id = tx.kyt_case_id.ok_or_else(|| CoreError::NotFound {
            entity: "kyt_case",
            id: "none".to_string(),
        })?;
        let case = self
            .store
            .case(case_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "kyt_case",
                id: case_id.to_string(),
            })?;

        match case.status {
            CaseStatus::Pending => Err(CoreError::Conflict(format!(
                "kyt case {case_id} is not resolved"
            ))),
            CaseStatus::ResolvedBlock => {
                self.transition(&mut tx, TxStatus::KytBlocked, None, None, correlation_id)
                    .await?;
                Ok(tx)
            }
            CaseStatus::ResolvedAllow => {
                // Approval requirements were frozen at policy time.
                let wallet = self.load_wallet(tx.wallet_id).await?;
                self.process_approval_gate(&mut tx, &wallet, None, correlation_id)
                    .await?;
                self.load_tx(tx.id).await
            }
        }
    }

    // === Signing step ===

    async fn process_signing(
        &self,
        tx: &mut TxRequest,
        wallet: &Wallet,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.transition(tx, TxStatus::SignPending, actor_id, None, correlation_id)
            .await?;

        match self.prepare_and_sign(tx, wallet, actor_id, correlation_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(tx = %tx.id, %err, "signing failed");
                self.transition(
                    tx,
                    TxStatus::FailedSign,
                    actor_id,
                    Some(json!({"error": err.to_string(), "code": err.code()})),
                    correlation_id,
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn prepare_and_sign(
        &self,
        tx: &mut TxRequest,
        wallet: &Wallet,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<()> {
        let sender = wallet
            .address
            .clone()
            .ok_or_else(|| CoreError::Configuration("wallet has no address".to_string()))?;

        let quote = GasOracle::quote(self.chain.as_ref()).await?;
        let gas_limit = GasOracle::estimate(
            self.chain.as_ref(),
            &sender,
            &tx.to_address,
            tx.amount_wei,
            tx.data.as_deref(),
        )
        .await;
        let nonce = self.nonces.next_nonce(self.chain.as_ref(), &sender).await?;

        tx.gas_limit = Some(gas_limit);
        tx.gas_price = Some(quote.legacy_gas_price);
        tx.nonce = Some(nonce);
        self.store.update_tx(tx.clone()).await?;

        let fields = build_tx_fields(
            &tx.to_address,
            &tx.asset,
            tx.amount_wei,
            tx.data.as_deref(),
            nonce,
            quote.legacy_gas_price,
            gas_limit,
            self.config.chain_id,
        )?;
        let digest = signing_digest(&fields);
        let permit = self.issue_permit(tx, wallet, &digest, actor_id, correlation_id).await?;

        match wallet.custody_backend {
            CustodyBackend::MpcTecdsa => {
                // The threshold protocol runs out-of-band; `mpc_finalize`
                // resumes from the (r, s, v) triple.
                info!(tx = %tx.id, permit = %permit.id, "permit issued, awaiting threshold signing");
                Ok(())
            }
            CustodyBackend::LocalKey => {
                let signer = self.local_signer.as_ref().ok_or_else(|| {
                    CoreError::Configuration("local signer key not configured".to_string())
                })?;
                let digest_hex = format!("0x{}", hex::encode(digest));
                self.permits.check(&permit, &digest_hex, correlation_id).await?;

                let (raw, tx_hash) = signer.sign(&fields)?;
                self.permits.consume(permit.id).await?;

                tx.signed_tx = Some(format!("0x{}", hex::encode(&raw)));
                tx.tx_hash = Some(tx_hash.clone());
                self.store.update_tx(tx.clone()).await?;

                self.audit
                    .log(
                        AuditRecord::system(AuditEventType::TxSigned, correlation_id)
                            .actor(actor_id)
                            .entity("TX_REQUEST", tx.id)
                            .payload(json!({
                                "tx_hash": tx_hash,
                                "nonce": nonce,
                                "gas_limit": gas_limit,
                                "chain_id": self.config.chain_id,
                                "signer_type": "LOCAL_KEY",
                                "permit_id": permit.id.to_string(),
                            })),
                    )
                    .await?;
                self.transition(tx, TxStatus::Signed, actor_id, None, correlation_id)
                    .await?;
                self.process_broadcast(tx, wallet, actor_id, correlation_id).await
            }
        }
    }

    async fn issue_permit(
        &self,
        tx: &TxRequest,
        wallet: &Wallet,
        digest: &[u8; 32],
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<shared_types::SigningPermit> {
        let votes = self.store.approvals_for(tx.id).await?;
        let approvers: Vec<Uuid> = votes
            .iter()
            .filter(|a| a.decision == ApprovalDecision::Approved)
            .map(|a| a.user_id)
            .collect();
        let approval_snapshot = ApprovalSnapshot {
            count: approvers.len() as u32,
            required: tx.required_approvals,
            approvers,
        };

        // The permit names the keyset as the signer nodes know it: the
        // last segment of the wallet's keyset URI.
        let keyset_id = match &wallet.mpc_keyset_ref {
            Some(keyset_ref) => keyset_ref
                .rsplit('/')
                .next()
                .unwrap_or(keyset_ref.as_str())
                .to_string(),
            None => format!(
                "local:{}",
                wallet.address.as_ref().map(|a| a.as_str()).unwrap_or("unknown")
            ),
        };

        let content = PermitContent {
            tx_request_id: tx.id,
            wallet_id: wallet.id,
            keyset_id,
            tx_hash: format!("0x{}", hex::encode(digest)),
            kyt_result: tx
                .kyt_result
                .map(|v| v.to_string())
                .unwrap_or_else(|| "ALLOW".to_string()),
            kyt_snapshot: json!({
                "case_id": tx.kyt_case_id.map(|c| c.to_string()),
            }),
            policy_result: "ALLOWED".to_string(),
            policy_snapshot: tx.policy_result.clone().unwrap_or(Value::Null),
            approval_snapshot,
            audit_anchor_hash: self.audit.anchor().await?,
        };
        self.permits.issue(content, actor_id, correlation_id).await
    }

    /// Open the threshold-signing session for a permit-holding request.
    ///
    /// Every consumer re-validates the permit; a mismatched `message_hash`
    /// is recorded as `SIGN_PERMIT_REJECTED` and fails the request.
    pub async fn begin_mpc_signing(
        &self,
        tx_request_id: Uuid,
        message_hash: [u8; 32],
        user_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<SessionStarted> {
        let mut tx = self.load_tx(tx_request_id).await?;
        if tx.status != TxStatus::SignPending {
            return Err(CoreError::Conflict(format!(
                "request {tx_request_id} is not pending signature"
            )));
        }
        let wallet = self.load_wallet(tx.wallet_id).await?;
        if wallet.custody_backend != CustodyBackend::MpcTecdsa {
            return Err(CoreError::Conflict(
                "threshold signing applies only to MPC custody".to_string(),
            ));
        }
        let permit = self
            .permits
            .open_for_tx(tx.id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "signing_permit",
                id: tx.id.to_string(),
            })?;

        match self
            .coordinator
            .start_signing(&permit, message_hash, Some(user_id), correlation_id)
            .await
        {
            Ok(started) => Ok(started),
            Err(err) => {
                self.transition(
                    &mut tx,
                    TxStatus::FailedSign,
                    Some(user_id),
                    Some(json!({"error": err.to_string(), "code": err.code()})),
                    correlation_id,
                )
                .await?;
                Err(err)
            }
        }
    }

    /// Assemble the signed transaction from the threshold `(r, s, v)`
    /// triple and proceed to broadcast.
    pub async fn mpc_finalize(
        &self,
        tx_request_id: Uuid,
        signature: SigningSignature,
        correlation_id: &str,
    ) -> CoreResult<TxRequest> {
        let mut tx = self.load_tx(tx_request_id).await?;
        if tx.status != TxStatus::SignPending {
            return Err(CoreError::Conflict(format!(
                "request {tx_request_id} is not pending signature"
            )));
        }
        let wallet = self.load_wallet(tx.wallet_id).await?;
        if wallet.custody_backend != CustodyBackend::MpcTecdsa {
            return Err(CoreError::Conflict(
                "finalize applies only to MPC custody".to_string(),
            ));
        }

        let (nonce, gas_price, gas_limit) = match (tx.nonce, tx.gas_price, tx.gas_limit) {
            (Some(n), Some(p), Some(l)) => (n, p, l),
            _ => {
                return Err(CoreError::Conflict(
                    "transaction parameters were never prepared".to_string(),
                ))
            }
        };
        let fields = build_tx_fields(
            &tx.to_address,
            &tx.asset,
            tx.amount_wei,
            tx.data.as_deref(),
            nonce,
            gas_price,
            gas_limit,
            self.config.chain_id,
        )?;
        let digest = signing_digest(&fields);

        let recoverable = RecoverableSignature {
            r: signature.r,
            s: signature.s,
            v: signature.v,
        };
        let recovered = recover_address(&digest, &recoverable)
            .map_err(|e| CoreError::ProtocolViolation(format!("unrecoverable signature: {e}")))?;
        let expected = wallet
            .address
            .as_ref()
            .map(|a| a.as_str().to_string())
            .unwrap_or_default();
        if recovered.to_lowercase() != expected {
            let err = CoreError::ProtocolViolation(format!(
                "signature recovers to {recovered}, wallet address is {expected}"
            ));
            self.transition(
                &mut tx,
                TxStatus::FailedSign,
                None,
                Some(json!({"error": err.to_string(), "code": err.code()})),
                correlation_id,
            )
            .await?;
            return Err(err);
        }

        let (raw, tx_hash) = signed_tx_payload(&fields, &recoverable);
        tx.signed_tx = Some(format!("0x{}", hex::encode(&raw)));
        tx.tx_hash = Some(tx_hash.clone());
        self.store.update_tx(tx.clone()).await?;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::TxSigned, correlation_id)
                    .entity("TX_REQUEST", tx.id)
                    .payload(json!({
                        "tx_hash": tx_hash,
                        "nonce": nonce,
                        "gas_limit": gas_limit,
                        "chain_id": self.config.chain_id,
                        "signer_type": "MPC_TECDSA",
                        "keyset_id": wallet.mpc_keyset_ref,
                    })),
            )
            .await?;
        self.transition(&mut tx, TxStatus::Signed, None, None, correlation_id)
            .await?;
        self.process_broadcast(&mut tx, &wallet, None, correlation_id)
            .await?;
        self.load_tx(tx.id).await
    }

    // === Broadcast step ===

    async fn process_broadcast(
        &self,
        tx: &mut TxRequest,
        wallet: &Wallet,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.transition(tx, TxStatus::BroadcastPending, actor_id, None, correlation_id)
            .await?;

        let signed = tx
            .signed_tx
            .as_ref()
            .ok_or_else(|| CoreError::Conflict("no signed payload to broadcast".to_string()))?;
        let raw = hex::decode(signed.trim_start_matches("0x"))
            .map_err(|e| CoreError::Serialization(format!("signed payload hex: {e}")))?;

        match broadcast_with_retry(
            self.chain.as_ref(),
            &raw,
            self.config.broadcast_max_attempts,
            Duration::from_millis(500),
        )
        .await
        {
            Ok(chain_hash) => {
                tx.tx_hash = Some(chain_hash.clone());
                self.store.update_tx(tx.clone()).await?;
                self.audit
                    .log(
                        AuditRecord::system(AuditEventType::TxBroadcasted, correlation_id)
                            .actor(actor_id)
                            .entity("TX_REQUEST", tx.id)
                            .payload(json!({"tx_hash": chain_hash})),
                    )
                    .await?;
                self.transition(tx, TxStatus::Broadcasted, actor_id, None, correlation_id)
                    .await?;
                self.transition(tx, TxStatus::Confirming, actor_id, None, correlation_id)
                    .await
            }
            Err(err) => {
                error!(tx = %tx.id, %err, "broadcast failed");
                if !err.is_transient() {
                    // The nonce may be burned or unusable; re-read the
                    // chain's view on the next assignment.
                    if let Some(sender) = &wallet.address {
                        self.nonces.reset(sender).await;
                    }
                }
                self.transition(
                    tx,
                    TxStatus::FailedBroadcast,
                    actor_id,
                    Some(json!({"error": err.to_string(), "code": err.code()})),
                    correlation_id,
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Manual re-broadcast of a request that exhausted its automatic
    /// retry budget.
    pub async fn retry_broadcast(
        &self,
        tx_request_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<TxRequest> {
        let mut tx = self.load_tx(tx_request_id).await?;
        if tx.status != TxStatus::FailedBroadcast {
            return Err(CoreError::Conflict(format!(
                "request {tx_request_id} is not awaiting re-broadcast"
            )));
        }
        let wallet = self.load_wallet(tx.wallet_id).await?;
        self.process_broadcast(&mut tx, &wallet, None, correlation_id)
            .await?;
        self.load_tx(tx.id).await
    }

    // === Confirmation step ===

    /// Poll the receipt and advance through CONFIRMED to FINALIZED when
    /// the confirmation threshold is met. Safe to call at any time; only
    /// CONFIRMING requests are touched.
    pub async fn check_confirmation(
        &self,
        tx_request_id: Uuid,
        correlation_id: &str,
    ) -> CoreResult<TxRequest> {
        let mut tx = self.load_tx(tx_request_id).await?;
        if tx.status != TxStatus::Confirming {
            return Ok(tx);
        }
        let Some(tx_hash) = tx.tx_hash.clone() else {
            return Ok(tx);
        };

        let Some(receipt) = self.chain.transaction_receipt(&tx_hash).await? else {
            return Ok(tx);
        };

        if receipt.status == Some(0) {
            // Semantic failure, not transport: no automatic retry.
            self.transition(
                &mut tx,
                TxStatus::FailedBroadcast,
                None,
                Some(json!({"reason": "Transaction reverted on-chain", "tx_hash": tx_hash})),
                correlation_id,
            )
            .await?;
            return Ok(tx);
        }

        let Some(tx_block) = receipt.block_number else {
            return Ok(tx);
        };
        let head = self.chain.block_number().await?;
        let confirmations = head.saturating_sub(tx_block) + 1;

        tx.block_number = Some(tx_block);
        tx.confirmations = tx.confirmations.max(confirmations);
        self.store.update_tx(tx.clone()).await?;

        if confirmations >= self.config.confirmation_blocks {
            self.audit
                .log(
                    AuditRecord::system(AuditEventType::TxConfirmed, correlation_id)
                        .entity("TX_REQUEST", tx.id)
                        .payload(json!({
                            "tx_hash": tx_hash,
                            "block_number": tx_block,
                            "confirmations": confirmations,
                            "required": self.config.confirmation_blocks,
                            "gas_used": receipt.gas_used,
                        })),
                )
                .await?;
            self.transition(&mut tx, TxStatus::Confirmed, None, None, correlation_id)
                .await?;

            self.store
                .add_volume(
                    tx.wallet_id,
                    Utc::now().date_naive(),
                    &tx.asset,
                    tx.amount_wei,
                )
                .await?;

            self.transition(&mut tx, TxStatus::Finalized, None, None, correlation_id)
                .await?;
            self.audit
                .log(
                    AuditRecord::system(AuditEventType::TxFinalized, correlation_id)
                        .entity("TX_REQUEST", tx.id)
                        .payload(json!({
                            "tx_hash": tx_hash,
                            "block_number": tx_block,
                            "final_confirmations": confirmations,
                        })),
                )
                .await?;
        }
        self.load_tx(tx.id).await
    }

    pub async fn tx_request(&self, tx_request_id: Uuid) -> CoreResult<Option<TxRequest>> {
        self.store.tx(tx_request_id).await
    }
}
