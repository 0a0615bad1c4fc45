//! Per-request audit evidence package.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use custody_store::{ApprovalStore, AuditStore, TxStore};
use shared_crypto::canonical_json_sha256;
use shared_types::{rfc3339_micros, AuditEvent, AuditEventType, CoreError, CoreResult};

use crate::service::AuditService;

/// Everything an auditor needs to reconstruct one request's history,
/// committed to by `package_hash`.
#[derive(Clone, Debug, Serialize)]
pub struct AuditPackage {
    pub tx_request_id: Uuid,
    pub tx_request: Value,
    pub policy_evaluation: Option<Value>,
    pub kyt_evaluation: Option<Value>,
    pub approvals: Vec<Value>,
    pub signing: Option<Value>,
    pub broadcast: Option<Value>,
    pub confirmations: Option<Value>,
    pub audit_events: Vec<AuditEvent>,
    pub generated_at: DateTime<Utc>,
    /// SHA-256 over the canonical serialization of everything above.
    pub package_hash: String,
}

impl<S: AuditStore + TxStore + ApprovalStore> AuditService<S> {
    /// Assemble the evidence package for one transaction request.
    ///
    /// The package hash is computed over the canonical JSON of the package
    /// body (hash field excluded), so a later re-assembly from the same
    /// stored state reproduces the commitment.
    pub async fn build_package(&self, tx_request_id: Uuid) -> CoreResult<AuditPackage> {
        let tx = self
            .store()
            .tx(tx_request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "tx_request",
                id: tx_request_id.to_string(),
            })?;

        let events = self
            .events_for_entity("TX_REQUEST", &tx_request_id.to_string())
            .await?;
        let approvals = self.store().approvals_for(tx_request_id).await?;

        let mut policy_evaluation = None;
        let mut kyt_evaluation = None;
        let mut signing = None;
        let mut broadcast = None;
        let mut confirmations = None;
        for event in &events {
            match event.event_type {
                AuditEventType::TxPolicyEvaluated => policy_evaluation = event.payload.clone(),
                AuditEventType::TxKytEvaluated => kyt_evaluation = event.payload.clone(),
                AuditEventType::TxSigned => {
                    signing = Some(json!({
                        "signed_at": rfc3339_micros(&event.timestamp),
                        "tx_hash": event
                            .payload
                            .as_ref()
                            .and_then(|p| p.get("tx_hash"))
                            .cloned(),
                    }));
                }
                AuditEventType::TxBroadcasted => broadcast = event.payload.clone(),
                AuditEventType::TxConfirmed => confirmations = event.payload.clone(),
                _ => {}
            }
        }

        let tx_request = json!({
            "id": tx.id.to_string(),
            "wallet_id": tx.wallet_id.to_string(),
            "to_address": tx.to_address.as_str(),
            "asset": tx.asset,
            "amount_wei": tx.amount_wei.to_string(),
            "status": tx.status.to_string(),
            "tx_hash": tx.tx_hash,
            "block_number": tx.block_number,
            "confirmations": tx.confirmations,
            "created_by": tx.created_by.to_string(),
            "created_at": rfc3339_micros(&tx.created_at),
        });

        let approvals: Vec<Value> = approvals
            .iter()
            .map(|a| {
                json!({
                    "id": a.id.to_string(),
                    "user_id": a.user_id.to_string(),
                    "decision": a.decision.to_string(),
                    "comment": a.comment,
                    "created_at": rfc3339_micros(&a.created_at),
                })
            })
            .collect();

        let generated_at = Utc::now();
        let body = json!({
            "tx_request_id": tx_request_id.to_string(),
            "tx_request": tx_request,
            "policy_evaluation": policy_evaluation,
            "kyt_evaluation": kyt_evaluation,
            "approvals": approvals,
            "signing": signing,
            "broadcast": broadcast,
            "confirmations": confirmations,
            "audit_events": events,
            "generated_at": rfc3339_micros(&generated_at),
        });
        let package_hash =
            canonical_json_sha256(&body).map_err(|e| CoreError::Serialization(e.to_string()))?;

        Ok(AuditPackage {
            tx_request_id,
            tx_request,
            policy_evaluation,
            kyt_evaluation,
            approvals,
            signing,
            broadcast,
            confirmations,
            audit_events: events,
            generated_at,
            package_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use custody_store::{MemoryStore, TxStore};
    use primitive_types::U256;
    use shared_types::{EthAddress, TxRequest};

    use crate::service::AuditRecord;

    use super::*;

    #[tokio::test]
    async fn test_package_collects_request_history() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());

        let tx = TxRequest::new(
            Uuid::new_v4(),
            EthAddress::parse("0xbb00000000000000000000000000000000000001").unwrap(),
            "ETH".into(),
            U256::from(1_000u64),
            None,
            Uuid::new_v4(),
            None,
        );
        store.create_tx(tx.clone()).await.unwrap();

        audit
            .log(
                AuditRecord::system(AuditEventType::TxPolicyEvaluated, "corr")
                    .entity("TX_REQUEST", tx.id)
                    .payload(json!({"decision": "ALLOW", "matched_rules": ["RET-01"]})),
            )
            .await
            .unwrap();
        audit
            .log(
                AuditRecord::system(AuditEventType::TxBroadcasted, "corr")
                    .entity("TX_REQUEST", tx.id)
                    .payload(json!({"tx_hash": "0xfeed"})),
            )
            .await
            .unwrap();

        let package = audit.build_package(tx.id).await.unwrap();
        assert_eq!(package.audit_events.len(), 2);
        assert_eq!(
            package.policy_evaluation.as_ref().unwrap()["matched_rules"][0],
            "RET-01"
        );
        assert_eq!(package.broadcast.as_ref().unwrap()["tx_hash"], "0xfeed");
        assert_eq!(package.package_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_package_for_unknown_request_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store);
        assert!(matches!(
            audit.build_package(Uuid::new_v4()).await,
            Err(CoreError::NotFound { .. })
        ));
    }
}
