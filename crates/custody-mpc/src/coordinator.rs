//! The MPC coordinator: session drivers and node quarantine.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info};
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, PermitStore};
use shared_crypto::sha256_hex;
use shared_types::{
    AuditEventType, CoreConfig, CoreError, CoreResult, SessionKind, SessionStatus,
    SigningPermit, SigningSignature,
};

use crate::node::SignerNode;
use crate::permit::PermitService;
use crate::session::{
    RoundOutcome, SessionCommand, SessionHandle, SessionInfo, SessionRegistry, SessionRunner,
};
use crate::wire::{DkgOutput, StartDkgRequest, StartSigningRequest, WirePermit};

/// Coordinator tuning.
#[derive(Clone, Debug)]
pub struct MpcSettings {
    pub dkg_timeout_seconds: u64,
    pub signing_timeout_seconds: u64,
    pub dkg_total_rounds: u32,
    pub signing_total_rounds: u32,
    pub cluster_id: String,
}

impl MpcSettings {
    pub fn from_core(config: &CoreConfig) -> Self {
        Self {
            dkg_timeout_seconds: config.dkg_timeout_seconds,
            signing_timeout_seconds: config.signing_timeout_seconds,
            dkg_total_rounds: 3,
            signing_total_rounds: 2,
            cluster_id: "default".to_string(),
        }
    }
}

/// Result of a finished DKG, ready for the wallet finalizer.
#[derive(Clone, Debug)]
pub struct DkgCompletion {
    pub keyset_id: String,
    /// Keyset URI persisted on the wallet.
    pub keyset_ref: String,
    pub public_key: Vec<u8>,
    pub public_key_compressed: Vec<u8>,
    pub ethereum_address: String,
}

/// Outcome of a session-start call.
#[derive(Clone, Debug)]
pub struct SessionStarted {
    pub session_id: Uuid,
    pub round1_msg: Option<Vec<u8>>,
}

/// Outcome of one DKG round delivery.
#[derive(Clone, Debug)]
pub struct DkgRoundResult {
    pub outgoing: Option<Vec<u8>>,
    pub completion: Option<DkgCompletion>,
    pub is_final: bool,
}

/// Outcome of one signing round delivery.
#[derive(Clone, Debug)]
pub struct SigningRoundResult {
    pub outgoing: Option<Vec<u8>>,
    pub signature: Option<SigningSignature>,
    pub is_final: bool,
}

/// Session-oriented driver over the signer-node connection.
pub struct MpcCoordinator<S, N> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
    permits: Arc<PermitService<S>>,
    node: Arc<N>,
    settings: MpcSettings,
    sessions: SessionRegistry,
    quarantined: Mutex<HashSet<String>>,
}

impl<S, N> MpcCoordinator<S, N>
where
    S: PermitStore + AuditStore + Send + Sync + 'static,
    N: SignerNode + 'static,
{
    pub fn new(
        store: Arc<S>,
        audit: Arc<AuditService<S>>,
        permits: Arc<PermitService<S>>,
        node: Arc<N>,
        settings: MpcSettings,
    ) -> Self {
        Self {
            store,
            audit,
            permits,
            node,
            settings,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            quarantined: Mutex::new(HashSet::new()),
        }
    }

    pub async fn is_quarantined(&self, node_id: &str) -> bool {
        self.quarantined.lock().await.contains(node_id)
    }

    /// Pre-session gate: the node must be neither quarantined nor
    /// reporting itself unhealthy.
    async fn ensure_node_allowed(&self) -> CoreResult<()> {
        if self.is_quarantined(&self.node.node_id()).await {
            return Err(CoreError::PermanentRemote(format!(
                "signer node {} is quarantined",
                self.node.node_id()
            )));
        }
        let health = self.node.health().await?;
        if !health.healthy {
            return Err(CoreError::TransientRemote(format!(
                "signer node {} reports unhealthy",
                self.node.node_id()
            )));
        }
        Ok(())
    }

    async fn quarantine(&self, reason: &str, correlation_id: &str) {
        let node_id = self.node.node_id();
        error!(node = %node_id, reason, "quarantining signer node");
        self.quarantined.lock().await.insert(node_id.clone());
        let record = AuditRecord::system(AuditEventType::MpcNodeQuarantined, correlation_id)
            .entity("MPC_NODE", &node_id)
            .payload(json!({"node_id": node_id, "reason": reason}));
        if let Err(err) = self.audit.log(record).await {
            error!(%err, "failed to audit node quarantine");
        }
    }

    async fn spawn_session(
        &self,
        kind: SessionKind,
        keyset_ref: Option<String>,
        total_rounds: u32,
        timeout_seconds: u64,
        permit_id: Option<Uuid>,
        correlation_id: &str,
    ) -> Uuid {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let info = Arc::new(parking_lot::RwLock::new(SessionInfo {
            session_id,
            kind,
            keyset_ref,
            status: SessionStatus::Pending,
            current_round: 0,
            total_rounds,
            participant_nodes: vec![self.node.node_id()],
            created_at: now,
            timeout_at: now + Duration::seconds(timeout_seconds as i64),
            error: None,
            permit_id,
        }));

        let (tx, rx) = mpsc::channel(8);
        let runner = SessionRunner {
            node: self.node.clone(),
            store: self.store.clone(),
            audit: self.audit.clone(),
            registry: self.sessions.clone(),
            info: info.clone(),
            commands: rx,
            permit_id,
            correlation_id: correlation_id.to_string(),
        };
        let handle = SessionHandle {
            commands: tx,
            info,
        };
        self.sessions.lock().await.insert(session_id, handle);
        tokio::spawn(runner.run());
        session_id
    }

    async fn send_round(
        &self,
        session_id: Uuid,
        round: u32,
        payload: Vec<u8>,
    ) -> CoreResult<RoundOutcome> {
        let sender = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&session_id)
                .map(|h| h.commands.clone())
                .ok_or_else(|| CoreError::NotFound {
                    entity: "mpc_session",
                    id: session_id.to_string(),
                })?
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(SessionCommand::Round {
                round,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CoreError::TransientRemote("session task terminated".into()))?;
        reply_rx
            .await
            .map_err(|_| CoreError::TransientRemote("session task dropped the round".into()))?
    }

    /// Observable snapshot of a live session.
    pub async fn session_info(&self, session_id: Uuid) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions.get(&session_id).map(|h| h.info.read().clone())
    }

    // === DKG ===

    /// Kick off distributed key generation for a wallet.
    pub async fn start_dkg(
        &self,
        wallet_id: Uuid,
        threshold: u16,
        total_parties: u16,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<SessionStarted> {
        self.ensure_node_allowed().await?;
        if threshold == 0 || threshold > total_parties {
            return Err(CoreError::Configuration(format!(
                "invalid threshold {threshold}-of-{total_parties}"
            )));
        }

        let session_id = self
            .spawn_session(
                SessionKind::Dkg,
                None,
                self.settings.dkg_total_rounds,
                self.settings.dkg_timeout_seconds,
                None,
                correlation_id,
            )
            .await;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::MpcKeygenStarted, correlation_id)
                    .actor(actor_id)
                    .entity("MPC_SESSION", session_id)
                    .payload(json!({
                        "wallet_id": wallet_id.to_string(),
                        "threshold": format!("{threshold}-of-{total_parties}"),
                        "cluster_id": self.settings.cluster_id,
                        "session_id": session_id.to_string(),
                    })),
            )
            .await?;

        let reply = self
            .node
            .start_dkg(StartDkgRequest {
                session_id: session_id.to_string(),
                wallet_id: wallet_id.to_string(),
                threshold,
                total_parties,
                party_index: 0,
            })
            .await;

        match reply {
            Ok(reply) if reply.success => {
                info!(session = %session_id, wallet = %wallet_id, "dkg session started");
                Ok(SessionStarted {
                    session_id,
                    round1_msg: reply.round1_msg,
                })
            }
            Ok(reply) => {
                let message = reply
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "dkg start refused".into());
                self.fail_dkg(session_id, wallet_id, &message, correlation_id)
                    .await?;
                Err(CoreError::PermanentRemote(message))
            }
            Err(err) => {
                self.fail_dkg(session_id, wallet_id, &err.to_string(), correlation_id)
                    .await?;
                Err(err)
            }
        }
    }

    async fn fail_dkg(
        &self,
        session_id: Uuid,
        wallet_id: Uuid,
        message: &str,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.sessions.lock().await.remove(&session_id);
        self.audit
            .log(
                AuditRecord::system(AuditEventType::MpcKeygenFailed, correlation_id)
                    .entity("MPC_SESSION", session_id)
                    .payload(json!({
                        "wallet_id": wallet_id.to_string(),
                        "error": message,
                        "session_id": session_id.to_string(),
                    })),
            )
            .await?;
        Ok(())
    }

    /// Deliver one DKG round from the user party.
    pub async fn dkg_round(
        &self,
        session_id: Uuid,
        round: u32,
        payload: Vec<u8>,
        correlation_id: &str,
    ) -> CoreResult<DkgRoundResult> {
        match self.send_round(session_id, round, payload).await {
            Ok(RoundOutcome::Continue { outgoing }) => Ok(DkgRoundResult {
                outgoing,
                completion: None,
                is_final: false,
            }),
            Ok(RoundOutcome::DkgComplete(output)) => {
                let completion = self.complete_dkg(session_id, output, correlation_id).await?;
                Ok(DkgRoundResult {
                    outgoing: None,
                    completion: Some(completion),
                    is_final: true,
                })
            }
            Ok(RoundOutcome::SigningComplete(_)) => Err(CoreError::ProtocolViolation(
                "signing output from a dkg session".into(),
            )),
            Err(err) => {
                if matches!(err, CoreError::ProtocolViolation(_)) {
                    self.quarantine(&err.to_string(), correlation_id).await;
                }
                self.audit
                    .log(
                        AuditRecord::system(AuditEventType::MpcKeygenFailed, correlation_id)
                            .entity("MPC_SESSION", session_id)
                            .payload(json!({
                                "error": err.to_string(),
                                "code": err.code(),
                                "session_id": session_id.to_string(),
                            })),
                    )
                    .await?;
                Err(err)
            }
        }
    }

    async fn complete_dkg(
        &self,
        session_id: Uuid,
        output: DkgOutput,
        correlation_id: &str,
    ) -> CoreResult<DkgCompletion> {
        let completion = DkgCompletion {
            keyset_ref: format!(
                "mpc-tecdsa://{}/{}",
                self.settings.cluster_id, output.keyset_id
            ),
            keyset_id: output.keyset_id,
            public_key: output.public_key,
            public_key_compressed: output.public_key_compressed,
            ethereum_address: output.ethereum_address,
        };
        self.audit
            .log(
                AuditRecord::system(AuditEventType::MpcKeygenCompleted, correlation_id)
                    .entity("MPC_KEYSET", &completion.keyset_id)
                    .payload(json!({
                        "keyset_id": completion.keyset_id,
                        "keyset_ref": completion.keyset_ref,
                        "address": completion.ethereum_address,
                        "public_key_hash": &sha256_hex(&completion.public_key)[..16],
                        "session_id": session_id.to_string(),
                    })),
            )
            .await?;
        info!(
            keyset = %completion.keyset_id,
            address = %completion.ethereum_address,
            "dkg completed"
        );
        Ok(completion)
    }

    // === Signing ===

    /// Open a signing session under a validated permit.
    ///
    /// The permit is re-validated here - the coordinator is itself a
    /// signing consumer - and travels to the node in wire form for the
    /// node's own verification.
    pub async fn start_signing(
        &self,
        permit: &SigningPermit,
        message_hash: [u8; 32],
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<SessionStarted> {
        self.ensure_node_allowed().await?;

        let requested = format!("0x{}", hex::encode(message_hash));
        self.permits.check(permit, &requested, correlation_id).await?;

        let session_id = self
            .spawn_session(
                SessionKind::Signing,
                Some(permit.keyset_id.clone()),
                self.settings.signing_total_rounds,
                self.settings.signing_timeout_seconds,
                Some(permit.id),
                correlation_id,
            )
            .await;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::MpcSignStarted, correlation_id)
                    .actor(actor_id)
                    .entity("MPC_SESSION", session_id)
                    .payload(json!({
                        "keyset_id": permit.keyset_id,
                        "tx_request_id": permit.tx_request_id.to_string(),
                        "tx_hash": permit.tx_hash,
                        "permit_hash": permit.permit_hash,
                        "session_id": session_id.to_string(),
                    })),
            )
            .await?;

        let wire = WirePermit::from_permit(permit, self.permits.signing_key())?;
        let reply = self
            .node
            .start_signing(StartSigningRequest {
                session_id: session_id.to_string(),
                keyset_id: permit.keyset_id.clone(),
                message_hash,
                permit: wire,
                party_index: 0,
            })
            .await;

        match reply {
            Ok(reply) if reply.success => Ok(SessionStarted {
                session_id,
                round1_msg: reply.round1_msg,
            }),
            Ok(reply) => {
                let message = reply
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "signing start refused".into());
                self.fail_signing(session_id, permit, &message, correlation_id)
                    .await?;
                Err(CoreError::PermanentRemote(message))
            }
            Err(err) => {
                self.fail_signing(session_id, permit, &err.to_string(), correlation_id)
                    .await?;
                Err(err)
            }
        }
    }

    async fn fail_signing(
        &self,
        session_id: Uuid,
        permit: &SigningPermit,
        message: &str,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.sessions.lock().await.remove(&session_id);
        self.audit
            .log(
                AuditRecord::system(AuditEventType::MpcSignFailed, correlation_id)
                    .entity("MPC_SESSION", session_id)
                    .payload(json!({
                        "keyset_id": permit.keyset_id,
                        "tx_request_id": permit.tx_request_id.to_string(),
                        "error": message,
                        "session_id": session_id.to_string(),
                    })),
            )
            .await?;
        Ok(())
    }

    /// Deliver one signing round; the terminal round consumes the permit
    /// atomically with the session completion.
    pub async fn signing_round(
        &self,
        session_id: Uuid,
        round: u32,
        payload: Vec<u8>,
        correlation_id: &str,
    ) -> CoreResult<SigningRoundResult> {
        let (permit_id, keyset_ref) = {
            let sessions = self.sessions.lock().await;
            match sessions.get(&session_id) {
                Some(handle) => {
                    let info = handle.info.read();
                    (info.permit_id, info.keyset_ref.clone())
                }
                None => (None, None),
            }
        };

        match self.send_round(session_id, round, payload).await {
            Ok(RoundOutcome::Continue { outgoing }) => Ok(SigningRoundResult {
                outgoing,
                signature: None,
                is_final: false,
            }),
            Ok(RoundOutcome::SigningComplete(output)) => {
                let signature = SigningSignature {
                    r: output.r,
                    s: output.s,
                    v: output.v,
                };
                // One signature, one permit: consumed with the completion.
                if let Some(permit_id) = permit_id {
                    self.permits.consume(permit_id).await?;
                }
                self.audit
                    .log(
                        AuditRecord::system(AuditEventType::MpcSignCompleted, correlation_id)
                            .entity("MPC_SESSION", session_id)
                            .payload(json!({
                                "keyset_id": keyset_ref,
                                "session_id": session_id.to_string(),
                                "signature_hash": &sha256_hex(&output.full_signature)[..16],
                            })),
                    )
                    .await?;
                Ok(SigningRoundResult {
                    outgoing: None,
                    signature: Some(signature),
                    is_final: true,
                })
            }
            Ok(RoundOutcome::DkgComplete(_)) => Err(CoreError::ProtocolViolation(
                "dkg output from a signing session".into(),
            )),
            Err(err) => {
                if matches!(err, CoreError::ProtocolViolation(_)) {
                    self.quarantine(&err.to_string(), correlation_id).await;
                }
                self.audit
                    .log(
                        AuditRecord::system(AuditEventType::MpcSignFailed, correlation_id)
                            .entity("MPC_SESSION", session_id)
                            .payload(json!({
                                "error": err.to_string(),
                                "code": err.code(),
                                "session_id": session_id.to_string(),
                            })),
                    )
                    .await?;
                Err(err)
            }
        }
    }
}
