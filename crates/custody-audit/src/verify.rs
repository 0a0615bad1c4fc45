//! Read-only chain verification.

use custody_store::AuditStore;
use uuid::Uuid;

use shared_types::CoreResult;

use crate::service::{event_hash, AuditService};

/// One defect discovered during verification.
#[derive(Clone, Debug)]
pub struct ChainFinding {
    pub sequence_number: u64,
    pub event_id: Uuid,
    pub detail: String,
}

/// Outcome of a chain walk.
#[derive(Clone, Debug)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub chain_intact: bool,
    pub total_events: usize,
    pub verified_events: usize,
    pub first_event_id: Option<Uuid>,
    pub last_event_id: Option<Uuid>,
    pub errors: Vec<ChainFinding>,
}

impl ChainVerification {
    fn empty() -> Self {
        Self {
            is_valid: true,
            chain_intact: true,
            total_events: 0,
            verified_events: 0,
            first_event_id: None,
            last_event_id: None,
            errors: Vec::new(),
        }
    }
}

impl<S: AuditStore> AuditService<S> {
    /// Walk events in `[from, to]` (whole chain when unset), checking that
    /// each event's `prev_hash` equals the predecessor's stored hash and
    /// that re-deriving each hash from the stored fields reproduces it.
    ///
    /// Side-effect free. A non-null `prev_hash` on sequence 1 is itself a
    /// finding: nothing may precede the genesis event.
    pub async fn verify_chain(
        &self,
        from: Option<u64>,
        to: Option<u64>,
    ) -> CoreResult<ChainVerification> {
        let events = self.store().audit_range(from, to).await?;
        if events.is_empty() {
            return Ok(ChainVerification::empty());
        }

        let mut errors = Vec::new();
        let mut verified = 0usize;

        // Expected predecessor hash for the first event in range.
        let mut expected_prev: Option<String> = match from {
            Some(f) if f > 1 => self
                .store()
                .audit_by_sequence(f - 1)
                .await?
                .map(|e| e.hash),
            _ => None,
        };
        let mut expected_seq = events[0].sequence_number;

        for event in &events {
            if event.sequence_number != expected_seq {
                errors.push(ChainFinding {
                    sequence_number: event.sequence_number,
                    event_id: event.id,
                    detail: format!(
                        "sequence gap: expected {expected_seq}, got {}",
                        event.sequence_number
                    ),
                });
                expected_seq = event.sequence_number;
            }

            if event.prev_hash != expected_prev {
                errors.push(ChainFinding {
                    sequence_number: event.sequence_number,
                    event_id: event.id,
                    detail: format!(
                        "prev_hash mismatch: expected {:?}, got {:?}",
                        expected_prev, event.prev_hash
                    ),
                });
            }

            match event_hash(event) {
                Ok(recomputed) if recomputed == event.hash => verified += 1,
                Ok(_) => errors.push(ChainFinding {
                    sequence_number: event.sequence_number,
                    event_id: event.id,
                    detail: "hash mismatch: event contents do not reproduce the stored hash"
                        .to_string(),
                }),
                Err(e) => errors.push(ChainFinding {
                    sequence_number: event.sequence_number,
                    event_id: event.id,
                    detail: format!("hash recomputation failed: {e}"),
                }),
            }

            expected_prev = Some(event.hash.clone());
            expected_seq += 1;
        }

        Ok(ChainVerification {
            is_valid: errors.is_empty(),
            chain_intact: errors.is_empty(),
            total_events: events.len(),
            verified_events: verified,
            first_event_id: events.first().map(|e| e.id),
            last_event_id: events.last().map(|e| e.id),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use custody_store::MemoryStore;
    use serde_json::json;
    use shared_types::AuditEventType;

    use crate::service::AuditRecord;

    use super::*;

    async fn seeded() -> (Arc<MemoryStore>, AuditService<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store.clone());
        for i in 0..5 {
            audit
                .log(
                    AuditRecord::system(AuditEventType::TxStatusChanged, "corr")
                        .entity("TX_REQUEST", Uuid::new_v4())
                        .payload(json!({"step": i})),
                )
                .await
                .unwrap();
        }
        (store, audit)
    }

    #[tokio::test]
    async fn test_clean_chain_verifies() {
        let (_, audit) = seeded().await;
        let report = audit.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_events, 5);
        assert_eq!(report.verified_events, 5);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_payload_tampering_is_detected() {
        let (store, audit) = seeded().await;

        let mut victim = store.audit_by_sequence(3).await.unwrap().unwrap();
        victim.payload = Some(json!({"step": 999}));
        assert!(store.overwrite_audit_event(3, victim.clone()).await);

        let report = audit.verify_chain(None, None).await.unwrap();
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|f| f.sequence_number == 3 && f.event_id == victim.id));
    }

    #[tokio::test]
    async fn test_partial_range_uses_prior_hash() {
        let (_, audit) = seeded().await;
        let report = audit.verify_chain(Some(3), Some(5)).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_events, 3);
    }

    #[tokio::test]
    async fn test_nonnull_prev_hash_on_genesis_is_flagged() {
        let (store, audit) = seeded().await;
        let mut genesis = store.audit_by_sequence(1).await.unwrap().unwrap();
        genesis.prev_hash = Some("f".repeat(64));
        store.overwrite_audit_event(1, genesis).await;

        let report = audit.verify_chain(Some(1), None).await.unwrap();
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|f| f.sequence_number == 1));
    }

    #[tokio::test]
    async fn test_empty_chain_is_valid() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(store);
        let report = audit.verify_chain(None, None).await.unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_events, 0);
    }
}
