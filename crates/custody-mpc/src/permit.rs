//! Signing-permit issuance, validation, and consumption.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, PermitStore};
use shared_crypto::{canonical_json_sha256, hmac_sha256, hmac_verify};
use shared_types::{
    rfc3339_micros, ApprovalSnapshot, AuditEventType, CoreError, CoreResult, PermitRejection,
    SigningPermit,
};

/// Pure validation of a permit against a signing request.
///
/// Checks, in order: not used, not revoked, unexpired, byte-for-byte hash
/// match, and an HMAC verification in constant time. The first failure
/// wins; the caller is responsible for recording the rejection.
pub fn validate_permit(
    permit: &SigningPermit,
    tx_hash: &str,
    key: &[u8],
    now: DateTime<Utc>,
) -> Result<(), PermitRejection> {
    if permit.is_used {
        return Err(PermitRejection::AlreadyUsed);
    }
    if permit.is_revoked {
        return Err(PermitRejection::Revoked);
    }
    if now > permit.expires_at {
        return Err(PermitRejection::Expired);
    }
    if !permit.tx_hash.eq(tx_hash) {
        return Err(PermitRejection::TxHashMismatch);
    }
    let tag = match hex::decode(&permit.signature) {
        Ok(tag) => tag,
        Err(_) => return Err(PermitRejection::BadSignature),
    };
    if !hmac_verify(key, permit.permit_hash.as_bytes(), &tag) {
        return Err(PermitRejection::BadSignature);
    }
    Ok(())
}

/// Content fields frozen into a new permit.
#[derive(Clone, Debug)]
pub struct PermitContent {
    pub tx_request_id: Uuid,
    pub wallet_id: Uuid,
    pub keyset_id: String,
    /// Hex digest the signer is authorized to sign.
    pub tx_hash: String,
    pub kyt_result: String,
    pub kyt_snapshot: Value,
    pub policy_result: String,
    pub policy_snapshot: Value,
    pub approval_snapshot: ApprovalSnapshot,
    pub audit_anchor_hash: String,
}

/// Store-backed permit lifecycle with audit logging.
pub struct PermitService<S> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
    key: Vec<u8>,
    ttl: Duration,
}

impl<S: PermitStore + AuditStore> PermitService<S> {
    pub fn new(store: Arc<S>, audit: Arc<AuditService<S>>, key: &[u8], ttl_seconds: u64) -> Self {
        Self {
            store,
            audit,
            key: key.to_vec(),
            ttl: Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn signing_key(&self) -> &[u8] {
        &self.key
    }

    /// Mint, persist, and audit a permit binding the signing decision to
    /// the full control graph that produced it.
    pub async fn issue(
        &self,
        content: PermitContent,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<SigningPermit> {
        let id = Uuid::new_v4();
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;

        let material = json!({
            "id": id.to_string(),
            "tx_request_id": content.tx_request_id.to_string(),
            "wallet_id": content.wallet_id.to_string(),
            "keyset_id": content.keyset_id,
            "tx_hash": content.tx_hash,
            "kyt_result": content.kyt_result,
            "kyt_snapshot": content.kyt_snapshot,
            "policy_result": content.policy_result,
            "policy_snapshot": content.policy_snapshot,
            "approval_snapshot": content.approval_snapshot,
            "audit_anchor_hash": content.audit_anchor_hash,
            "issued_at": rfc3339_micros(&issued_at),
            "expires_at": rfc3339_micros(&expires_at),
        });
        let permit_hash =
            canonical_json_sha256(&material).map_err(|e| CoreError::Serialization(e.to_string()))?;
        let signature = hex::encode(hmac_sha256(&self.key, permit_hash.as_bytes()));

        let permit = SigningPermit {
            id,
            tx_request_id: content.tx_request_id,
            wallet_id: content.wallet_id,
            keyset_id: content.keyset_id,
            tx_hash: content.tx_hash,
            kyt_result: content.kyt_result,
            kyt_snapshot: content.kyt_snapshot,
            policy_result: content.policy_result,
            policy_snapshot: content.policy_snapshot,
            approval_snapshot: content.approval_snapshot,
            audit_anchor_hash: content.audit_anchor_hash,
            permit_hash,
            signature,
            issued_at,
            expires_at,
            used_at: None,
            is_used: false,
            is_revoked: false,
        };
        self.store.insert_permit(permit.clone()).await?;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::SignPermitIssued, correlation_id)
                    .actor(actor_id)
                    .entity("SIGNING_PERMIT", permit.id)
                    .payload(json!({
                        "tx_request_id": permit.tx_request_id.to_string(),
                        "wallet_id": permit.wallet_id.to_string(),
                        "keyset_id": permit.keyset_id,
                        "permit_hash": permit.permit_hash,
                        "audit_anchor_hash": permit.audit_anchor_hash,
                        "expires_at": rfc3339_micros(&permit.expires_at),
                    })),
            )
            .await?;
        info!(permit = %permit.id, tx_request = %permit.tx_request_id, "signing permit issued");
        Ok(permit)
    }

    /// Validate a permit for a signing request, recording any rejection.
    pub async fn check(
        &self,
        permit: &SigningPermit,
        tx_hash: &str,
        correlation_id: &str,
    ) -> CoreResult<()> {
        match validate_permit(permit, tx_hash, &self.key, Utc::now()) {
            Ok(()) => Ok(()),
            Err(reason) => {
                self.audit
                    .log(
                        AuditRecord::system(AuditEventType::SignPermitRejected, correlation_id)
                            .entity("SIGNING_PERMIT", permit.id)
                            .payload(json!({
                                "tx_request_id": permit.tx_request_id.to_string(),
                                "requested_tx_hash": tx_hash,
                                "reason": reason.to_string(),
                                "code": reason.code(),
                            })),
                    )
                    .await?;
                Err(CoreError::PermitInvalid(reason))
            }
        }
    }

    /// Flip the permit to used, exactly once.
    pub async fn consume(&self, permit_id: Uuid) -> CoreResult<SigningPermit> {
        self.store.consume_permit(permit_id, Utc::now()).await
    }

    /// Revoke an open permit (session timeout, administrative action).
    pub async fn revoke(&self, permit_id: Uuid) -> CoreResult<()> {
        self.store.revoke_permit(permit_id).await
    }

    /// The open (unused, unrevoked) permit for a request, if any.
    pub async fn open_for_tx(&self, tx_request_id: Uuid) -> CoreResult<Option<SigningPermit>> {
        self.store.open_permit_for_tx(tx_request_id).await
    }
}
