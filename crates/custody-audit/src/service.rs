//! Append path of the audit log.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use custody_store::AuditStore;
use shared_crypto::canonical_json_sha256;
use shared_types::{
    rfc3339_micros, ActorType, AuditEvent, AuditEventType, CoreError, CoreResult,
};

/// Draft of an audit event, before sequencing and hashing.
#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub correlation_id: String,
    pub actor_id: Option<Uuid>,
    pub actor_type: ActorType,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub payload: Option<Value>,
}

impl AuditRecord {
    /// An event caused by the system itself.
    pub fn system(event_type: AuditEventType, correlation_id: &str) -> Self {
        Self {
            event_type,
            correlation_id: correlation_id.to_string(),
            actor_id: None,
            actor_type: ActorType::System,
            entity_type: None,
            entity_id: None,
            payload: None,
        }
    }

    /// An event caused by a user action.
    pub fn user(event_type: AuditEventType, correlation_id: &str, actor_id: Uuid) -> Self {
        Self {
            actor_id: Some(actor_id),
            actor_type: ActorType::User,
            ..Self::system(event_type, correlation_id)
        }
    }

    pub fn actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }

    pub fn entity(mut self, entity_type: &str, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Recompute the hash of an audit event from its stored fields.
///
/// The hashed material is the canonical JSON of
/// `{event_id, timestamp, event_type, actor_id, entity_type, entity_id,
/// payload, prev_hash}` with keys sorted and no whitespace.
pub fn event_hash(event: &AuditEvent) -> CoreResult<String> {
    hash_fields(
        event.id,
        &rfc3339_micros(&event.timestamp),
        event.event_type,
        event.actor_id,
        event.entity_type.as_deref(),
        event.entity_id.as_deref(),
        event.payload.as_ref(),
        event.prev_hash.as_deref(),
    )
}

#[allow(clippy::too_many_arguments)]
fn hash_fields(
    event_id: Uuid,
    timestamp: &str,
    event_type: AuditEventType,
    actor_id: Option<Uuid>,
    entity_type: Option<&str>,
    entity_id: Option<&str>,
    payload: Option<&Value>,
    prev_hash: Option<&str>,
) -> CoreResult<String> {
    let material = json!({
        "event_id": event_id.to_string(),
        "timestamp": timestamp,
        "event_type": event_type,
        "actor_id": actor_id.map(|a| a.to_string()),
        "entity_type": entity_type,
        "entity_id": entity_id,
        "payload": payload,
        "prev_hash": prev_hash,
    });
    canonical_json_sha256(&material).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// The audit log service.
///
/// All appends in the process go through one instance; the internal mutex
/// serializes the read-last / hash / append sequence, which is what keeps
/// `sequence_number` dense and the chain unforked. (A relational adapter
/// gets the same guarantee from its transaction and a `SELECT ... FOR
/// UPDATE` on the tail.)
pub struct AuditService<S> {
    store: Arc<S>,
    chain_guard: Mutex<()>,
}

impl<S: AuditStore> AuditService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            chain_guard: Mutex::new(()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Append one event, linking it to the current chain tail.
    pub async fn log(&self, record: AuditRecord) -> CoreResult<AuditEvent> {
        let _guard = self.chain_guard.lock().await;

        let last = self.store.last_audit().await?;
        let sequence_number = last.as_ref().map(|e| e.sequence_number + 1).unwrap_or(1);
        let prev_hash = last.map(|e| e.hash);

        let id = Uuid::new_v4();
        let timestamp = Utc::now();
        let hash = hash_fields(
            id,
            &rfc3339_micros(&timestamp),
            record.event_type,
            record.actor_id,
            record.entity_type.as_deref(),
            record.entity_id.as_deref(),
            record.payload.as_ref(),
            prev_hash.as_deref(),
        )?;

        let event = AuditEvent {
            id,
            sequence_number,
            timestamp,
            event_type: record.event_type,
            actor_id: record.actor_id,
            actor_type: record.actor_type,
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            payload: record.payload,
            correlation_id: record.correlation_id,
            prev_hash,
            hash,
        };

        self.store.append_audit(event.clone()).await?;
        debug!(
            seq = event.sequence_number,
            event_type = %event.event_type,
            entity = ?event.entity_id,
            "audit event appended"
        );
        Ok(event)
    }

    /// Hash of the newest event: the anchor frozen into signing permits.
    pub async fn anchor(&self) -> CoreResult<String> {
        Ok(self
            .store
            .last_audit()
            .await?
            .map(|e| e.hash)
            .unwrap_or_else(|| "genesis".to_string()))
    }

    /// Events recorded against one entity, in sequence order.
    pub async fn events_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> CoreResult<Vec<AuditEvent>> {
        self.store.audit_for_entity(entity_type, entity_id, 1000).await
    }
}
