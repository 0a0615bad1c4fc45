//! Task-owned MPC session state.
//!
//! Each session is a state-machine value owned by a task spawned at
//! session creation; round deliveries arrive on a bounded channel, and the
//! task is the only writer of its state. The coordinator's registry holds
//! channels, not session state. A session past its deadline posts its own
//! terminal failure (and releases the in-flight permit) without waiting
//! for a caller that may never come.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, PermitStore};
use shared_types::{
    AuditEventType, CoreError, CoreResult, ErrorCategory, SessionKind, SessionStatus,
};

use crate::messages::parse_round_payload;
use crate::node::SignerNode;
use crate::wire::{DkgOutput, RoundRequest, SigningOutput};

/// Transient round deliveries are retried this many extra times.
const ROUND_RETRIES: u32 = 2;

/// Observable snapshot of one session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub kind: SessionKind,
    pub keyset_ref: Option<String>,
    pub status: SessionStatus,
    pub current_round: u32,
    pub total_rounds: u32,
    pub participant_nodes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub error: Option<(ErrorCategory, String)>,
    /// The permit this signing session runs under, if any.
    pub permit_id: Option<Uuid>,
}

/// What one round delivery produced.
#[derive(Clone, Debug)]
pub enum RoundOutcome {
    /// More rounds to go; `outgoing` is the node's next message (if any).
    Continue { outgoing: Option<Vec<u8>> },
    DkgComplete(DkgOutput),
    SigningComplete(SigningOutput),
}

pub(crate) enum SessionCommand {
    Round {
        round: u32,
        payload: Vec<u8>,
        reply: oneshot::Sender<CoreResult<RoundOutcome>>,
    },
}

/// Coordinator-side handle: the channel plus a shared state snapshot.
pub(crate) struct SessionHandle {
    pub commands: mpsc::Sender<SessionCommand>,
    pub info: Arc<parking_lot::RwLock<SessionInfo>>,
}

pub(crate) type SessionRegistry = Arc<Mutex<HashMap<Uuid, SessionHandle>>>;

/// The session task.
pub(crate) struct SessionRunner<S, N> {
    pub node: Arc<N>,
    pub store: Arc<S>,
    pub audit: Arc<AuditService<S>>,
    pub registry: SessionRegistry,
    pub info: Arc<parking_lot::RwLock<SessionInfo>>,
    pub commands: mpsc::Receiver<SessionCommand>,
    /// Open permit to revoke if this session dies by deadline.
    pub permit_id: Option<Uuid>,
    pub correlation_id: String,
}

impl<S, N> SessionRunner<S, N>
where
    S: PermitStore + AuditStore + Send + Sync + 'static,
    N: SignerNode + 'static,
{
    pub(crate) async fn run(mut self) {
        let session_id = self.info.read().session_id;
        loop {
            let timeout_at = self.info.read().timeout_at;
            let remaining = (timeout_at - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Round { round, payload, reply }) => {
                        let result = self.deliver(round, &payload).await;
                        let terminal = !matches!(result, Ok(RoundOutcome::Continue { .. }));
                        let _ = reply.send(result);
                        if terminal {
                            break;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(remaining) => {
                    self.expire().await;
                    break;
                }
            }
        }
        self.registry.lock().await.remove(&session_id);
    }

    async fn deliver(&self, round: u32, payload: &[u8]) -> CoreResult<RoundOutcome> {
        {
            let mut info = self.info.write();
            info.status = SessionStatus::InProgress;
            info.current_round = round;
        }
        let (session_id, kind) = {
            let info = self.info.read();
            (info.session_id, info.kind)
        };
        let request = RoundRequest {
            session_id: session_id.to_string(),
            round,
            incoming: parse_round_payload(payload),
        };

        let result = self.deliver_with_retry(kind, request).await;
        match &result {
            Ok(RoundOutcome::Continue { .. }) => {}
            Ok(_) => self.info.write().status = SessionStatus::Completed,
            Err(err) => {
                let category = match err {
                    CoreError::TransientRemote(_) => ErrorCategory::Transient,
                    CoreError::ProtocolViolation(_) => ErrorCategory::ProtocolViolation,
                    _ => ErrorCategory::Permanent,
                };
                let mut info = self.info.write();
                info.status = SessionStatus::Failed;
                info.error = Some((category, err.to_string()));
            }
        }
        result
    }

    async fn deliver_with_retry(
        &self,
        kind: SessionKind,
        request: RoundRequest,
    ) -> CoreResult<RoundOutcome> {
        let mut last_err = None;
        for attempt in 0..=ROUND_RETRIES {
            let outcome: CoreResult<RoundOutcome> = match kind {
                SessionKind::Dkg => match self.node.dkg_round(request.clone()).await {
                    Err(err) => Err(err),
                    Ok(reply) if !reply.success => Err(node_error(reply.error, "dkg round refused")),
                    Ok(reply) if reply.is_final => match reply.result {
                        Some(output) => Ok(RoundOutcome::DkgComplete(output)),
                        None => Err(CoreError::ProtocolViolation(
                            "final dkg round without output".into(),
                        )),
                    },
                    Ok(reply) => Ok(RoundOutcome::Continue {
                        outgoing: reply.outgoing,
                    }),
                },
                SessionKind::Signing => match self.node.signing_round(request.clone()).await {
                    Err(err) => Err(err),
                    Ok(reply) if !reply.success => {
                        Err(node_error(reply.error, "signing round refused"))
                    }
                    Ok(reply) if reply.is_final => match reply.result {
                        Some(output) => Ok(RoundOutcome::SigningComplete(output)),
                        None => Err(CoreError::ProtocolViolation(
                            "final signing round without signature".into(),
                        )),
                    },
                    Ok(reply) => Ok(RoundOutcome::Continue {
                        outgoing: reply.outgoing,
                    }),
                },
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(err) if err.is_transient() && attempt < ROUND_RETRIES => {
                    warn!(attempt, %err, "round delivery failed, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::TransientRemote("round delivery failed".into())))
    }

    async fn expire(&self) {
        let (session_id, kind) = {
            let mut info = self.info.write();
            info.status = SessionStatus::Timeout;
            info.error = Some((ErrorCategory::Transient, "session deadline elapsed".into()));
            (info.session_id, info.kind)
        };
        warn!(session = %session_id, ?kind, "mpc session timed out");

        if let Some(permit_id) = self.permit_id {
            if let Err(err) = self.store.revoke_permit(permit_id).await {
                warn!(%err, "failed to revoke permit of timed-out session");
            }
        }

        let event_type = match kind {
            SessionKind::Dkg => AuditEventType::MpcKeygenFailed,
            SessionKind::Signing => AuditEventType::MpcSignFailed,
        };
        let record = AuditRecord::system(event_type, &self.correlation_id)
            .entity("MPC_SESSION", session_id)
            .payload(json!({
                "code": "SESSION_TIMEOUT",
                "error": "session deadline elapsed",
                "permit_revoked": self.permit_id.map(|p| p.to_string()),
            }));
        if let Err(err) = self.audit.log(record).await {
            warn!(%err, "failed to audit session timeout");
        }
        debug!(session = %session_id, "session resources released");
    }
}

fn node_error(error: Option<crate::wire::NodeError>, fallback: &str) -> CoreError {
    match error {
        Some(err) => match err.category {
            ErrorCategory::Transient => CoreError::TransientRemote(err.message),
            ErrorCategory::Permanent => CoreError::PermanentRemote(err.message),
            ErrorCategory::ProtocolViolation => CoreError::ProtocolViolation(err.message),
        },
        None => CoreError::PermanentRemote(fallback.to_string()),
    }
}
