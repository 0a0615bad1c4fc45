//! Administration services: groups, address books, policy sets.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, GroupStore, PolicyStore};
use shared_types::{
    AddressBookEntry, AddressKind, AuditEventType, CoreError, CoreResult, EthAddress, Group,
    PolicyRule, PolicySet, RuleDecision,
};

use crate::normalize::normalize_conditions;
use crate::snapshot::rules_snapshot_hash;

/// Group and membership administration.
pub struct GroupService<S> {
    store: Arc<S>,
}

impl<S: GroupStore> GroupService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create a group. At most one group may be the default.
    pub async fn create_group(&self, name: &str, is_default: bool) -> CoreResult<Group> {
        let group = Group {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_default,
            created_at: Utc::now(),
        };
        self.store.insert_group(group.clone()).await?;
        Ok(group)
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> CoreResult<()> {
        self.store.add_member(group_id, user_id).await
    }

    pub async fn group(&self, id: Uuid) -> CoreResult<Option<Group>> {
        self.store.group(id).await
    }
}

/// Per-group allow/deny address books.
pub struct AddressBookService<S> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
}

impl<S: GroupStore + AuditStore> AddressBookService<S> {
    pub fn new(store: Arc<S>, audit: Arc<AuditService<S>>) -> Self {
        Self { store, audit }
    }

    /// Add an address to a group's book; an existing entry for the same
    /// address is updated in place.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_address(
        &self,
        group_id: Uuid,
        address: EthAddress,
        kind: AddressKind,
        label: Option<&str>,
        created_by: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<AddressBookEntry> {
        let updated = self.store.address_entry(group_id, &address).await?.is_some();
        let entry = AddressBookEntry {
            id: Uuid::new_v4(),
            group_id,
            address: address.clone(),
            kind,
            label: label.map(str::to_string),
            created_by,
            created_at: Utc::now(),
        };
        self.store.upsert_address_entry(entry.clone()).await?;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::AddressBookEntryAdded, correlation_id)
                    .actor(created_by)
                    .entity("GROUP", group_id)
                    .payload(json!({
                        "address": address.as_str(),
                        "kind": kind,
                        "label": label,
                        "updated": updated,
                    })),
            )
            .await?;
        Ok(entry)
    }

    pub async fn remove_address(
        &self,
        group_id: Uuid,
        address: &EthAddress,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<bool> {
        let removed = self.store.remove_address_entry(group_id, address).await?;
        if removed {
            self.audit
                .log(
                    AuditRecord::system(AuditEventType::AddressBookEntryRemoved, correlation_id)
                        .actor(actor_id)
                        .entity("GROUP", group_id)
                        .payload(json!({"address": address.as_str()})),
                )
                .await?;
        }
        Ok(removed)
    }

    pub async fn list(&self, group_id: Uuid) -> CoreResult<Vec<AddressBookEntry>> {
        self.store.list_address_entries(group_id).await
    }
}

/// Versioned policy-set administration.
pub struct PolicySetService<S> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
}

impl<S: PolicyStore + AuditStore> PolicySetService<S> {
    pub fn new(store: Arc<S>, audit: Arc<AuditService<S>>) -> Self {
        Self { store, audit }
    }

    /// Create a new policy set under `name` at version `max(existing) + 1`.
    pub async fn create_policy_set(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<PolicySet> {
        let version = self.store.max_version(name).await? + 1;
        let now = Utc::now();
        let set = PolicySet {
            id: Uuid::new_v4(),
            name: name.to_string(),
            version,
            description: description.map(str::to_string),
            is_active: true,
            snapshot_hash: None,
            rules: Vec::new(),
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_policy_set(set.clone()).await?;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::PolicySetCreated, correlation_id)
                    .actor(created_by)
                    .entity("POLICY_SET", set.id)
                    .payload(json!({
                        "name": name,
                        "version": version,
                        "description": description,
                    })),
            )
            .await?;
        info!(name, version, "policy set created");
        Ok(set)
    }

    /// Add a rule, normalizing the untyped condition bag. The set's
    /// snapshot hash is recomputed in the same write.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_rule(
        &self,
        policy_set_id: Uuid,
        rule_id: &str,
        conditions: &Value,
        decision: RuleDecision,
        priority: i32,
        kyt_required: bool,
        approval_required: bool,
        approval_count: u32,
        description: Option<&str>,
        actor_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<PolicyRule> {
        let mut set = self
            .store
            .policy_set(policy_set_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "policy_set",
                id: policy_set_id.to_string(),
            })?;

        if set.rules.iter().any(|r| r.rule_id == rule_id) {
            return Err(CoreError::Conflict(format!(
                "rule {rule_id} already exists in policy set {}",
                set.version_string()
            )));
        }

        let rule = PolicyRule {
            id: Uuid::new_v4(),
            rule_id: rule_id.to_string(),
            priority,
            conditions: normalize_conditions(conditions)?,
            decision,
            kyt_required,
            approval_required,
            approval_count,
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        set.rules.push(rule.clone());
        set.snapshot_hash = Some(rules_snapshot_hash(&set.rules)?);
        set.updated_at = Utc::now();
        self.store.update_policy_set(set).await?;

        self.audit
            .log(
                AuditRecord::system(AuditEventType::PolicyRuleAdded, correlation_id)
                    .actor(actor_id)
                    .entity("POLICY_SET", policy_set_id)
                    .payload(json!({
                        "rule_id": rule_id,
                        "priority": priority,
                        "conditions": rule.conditions,
                        "decision": decision,
                        "kyt_required": kyt_required,
                        "approval_required": approval_required,
                        "approval_count": approval_count,
                    })),
            )
            .await?;
        Ok(rule)
    }

    /// Assign a policy set to a group, replacing any prior assignment.
    pub async fn assign_to_group(
        &self,
        group_id: Uuid,
        policy_set_id: Uuid,
        assigned_by: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<()> {
        self.store.assign_policy(group_id, policy_set_id).await?;
        self.audit
            .log(
                AuditRecord::system(AuditEventType::PolicySetAssigned, correlation_id)
                    .actor(assigned_by)
                    .entity("GROUP", group_id)
                    .payload(json!({"policy_set_id": policy_set_id.to_string()})),
            )
            .await?;
        Ok(())
    }

    /// Toggle a version's active flag.
    pub async fn set_active(&self, policy_set_id: Uuid, is_active: bool) -> CoreResult<()> {
        let mut set = self
            .store
            .policy_set(policy_set_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "policy_set",
                id: policy_set_id.to_string(),
            })?;
        set.is_active = is_active;
        set.updated_at = Utc::now();
        self.store.update_policy_set(set).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_store::MemoryStore;

    fn services() -> (
        Arc<MemoryStore>,
        PolicySetService<MemoryStore>,
        GroupService<MemoryStore>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(AuditService::new(store.clone()));
        (
            store.clone(),
            PolicySetService::new(store.clone(), audit),
            GroupService::new(store),
        )
    }

    #[tokio::test]
    async fn test_versions_increment_per_name() {
        let (_, policies, _) = services();
        let v1 = policies
            .create_policy_set("Retail", None, None, "corr")
            .await
            .unwrap();
        let v2 = policies
            .create_policy_set("Retail", None, None, "corr")
            .await
            .unwrap();
        let other = policies
            .create_policy_set("Treasury", None, None, "corr")
            .await
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(other.version, 1);
    }

    #[tokio::test]
    async fn test_add_rule_updates_snapshot_hash() {
        let (store, policies, _) = services();
        let set = policies
            .create_policy_set("Retail", None, None, "corr")
            .await
            .unwrap();
        assert!(set.snapshot_hash.is_none());

        policies
            .add_rule(
                set.id,
                "RET-01",
                &json!({"amount_lte": "0.001"}),
                RuleDecision::Allow,
                10,
                false,
                false,
                0,
                None,
                None,
                "corr",
            )
            .await
            .unwrap();

        let stored = store.policy_set(set.id).await.unwrap().unwrap();
        let first_hash = stored.snapshot_hash.clone().unwrap();
        assert_eq!(first_hash, rules_snapshot_hash(&stored.rules).unwrap());

        policies
            .add_rule(
                set.id,
                "RET-02",
                &json!({}),
                RuleDecision::Block,
                20,
                false,
                false,
                0,
                None,
                None,
                "corr",
            )
            .await
            .unwrap();
        let stored = store.policy_set(set.id).await.unwrap().unwrap();
        assert_ne!(stored.snapshot_hash.unwrap(), first_hash);
    }

    #[tokio::test]
    async fn test_duplicate_rule_id_conflicts() {
        let (_, policies, _) = services();
        let set = policies
            .create_policy_set("Retail", None, None, "corr")
            .await
            .unwrap();
        policies
            .add_rule(set.id, "RET-01", &json!({}), RuleDecision::Allow, 10, false, false, 0, None, None, "corr")
            .await
            .unwrap();
        let err = policies
            .add_rule(set.id, "RET-01", &json!({}), RuleDecision::Block, 20, false, false, 0, None, None, "corr")
            .await;
        assert!(matches!(err, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_bad_condition_bag_rejected_at_insert() {
        let (_, policies, _) = services();
        let set = policies
            .create_policy_set("Retail", None, None, "corr")
            .await
            .unwrap();
        let err = policies
            .add_rule(
                set.id,
                "RET-01",
                &json!({"amount_maximum": "1"}),
                RuleDecision::Allow,
                10,
                false,
                false,
                0,
                None,
                None,
                "corr",
            )
            .await;
        assert!(matches!(err, Err(CoreError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_inactive_set_not_served_for_group() {
        let (store, policies, groups) = services();
        let group = groups.create_group("Retail", true).await.unwrap();
        let set = policies
            .create_policy_set("Retail", None, None, "corr")
            .await
            .unwrap();
        policies
            .assign_to_group(group.id, set.id, None, "corr")
            .await
            .unwrap();
        assert!(store.active_set_for_group(group.id).await.unwrap().is_some());

        policies.set_active(set.id, false).await.unwrap();
        assert!(store.active_set_for_group(group.id).await.unwrap().is_none());
    }
}
