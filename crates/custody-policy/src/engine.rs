//! Tiered policy evaluation.

use std::sync::Arc;

use chrono::Utc;
use primitive_types::U256;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use custody_audit::{AuditRecord, AuditService};
use custody_store::{AuditStore, GroupStore, PolicyStore};
use shared_types::{
    AddressKind, AddressStatus, AuditEventType, CoreResult, EthAddress, Group, PolicyEvalResult,
    RuleDecision, Wallet,
};

/// The policy engine: group → active policy set → priority-ordered rules.
pub struct PolicyEngine<S> {
    store: Arc<S>,
    audit: Arc<AuditService<S>>,
}

impl<S: PolicyStore + GroupStore + AuditStore> PolicyEngine<S> {
    pub fn new(store: Arc<S>, audit: Arc<AuditService<S>>) -> Self {
        Self { store, audit }
    }

    /// Resolve a user's primary group: the default group when they belong
    /// to it, otherwise any of their groups.
    pub async fn primary_group(&self, user_id: Uuid) -> CoreResult<Option<Group>> {
        let groups = self.store.groups_for_user(user_id).await?;
        Ok(groups
            .iter()
            .find(|g| g.is_default)
            .or_else(|| groups.first())
            .cloned())
    }

    /// Classify a recipient against the group's address book.
    pub async fn classify_address(
        &self,
        group_id: Uuid,
        address: &EthAddress,
    ) -> CoreResult<(AddressStatus, Option<String>)> {
        match self.store.address_entry(group_id, address).await? {
            Some(entry) => {
                let status = match entry.kind {
                    AddressKind::Allow => AddressStatus::Allowlist,
                    AddressKind::Deny => AddressStatus::Denylist,
                };
                Ok((status, entry.label))
            }
            None => Ok((AddressStatus::Unknown, None)),
        }
    }

    /// Evaluate policy for an outbound transfer.
    ///
    /// Rules are scanned in ascending priority (ties by insertion order);
    /// the first ALLOW/BLOCK rule wins and its control flags are adopted.
    /// CONTINUE rules are recorded in `matched_rules` but defer the
    /// decision. With no terminal match, the fallback depends on the
    /// address classification: denylist and unknown addresses are blocked,
    /// allowlisted addresses pass with the full control set (KYT plus one
    /// approval).
    #[allow(clippy::too_many_arguments)]
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        to_address: &EthAddress,
        amount_wei: U256,
        asset: &str,
        _wallet: &Wallet,
        tx_request_id: Option<Uuid>,
        correlation_id: &str,
    ) -> CoreResult<PolicyEvalResult> {
        let Some(group) = self.primary_group(user_id).await? else {
            let result =
                PolicyEvalResult::blocked("NO_GROUP", "User is not assigned to any group");
            self.log_evaluation(&result, tx_request_id, user_id, to_address, amount_wei, asset, correlation_id)
                .await?;
            return Ok(result);
        };

        let Some(policy_set) = self.store.active_set_for_group(group.id).await? else {
            let mut result =
                PolicyEvalResult::blocked("NO_POLICY", "Group has no active policy assigned");
            result.group_id = Some(group.id);
            result.group_name = Some(group.name.clone());
            self.log_evaluation(&result, tx_request_id, user_id, to_address, amount_wei, asset, correlation_id)
                .await?;
            return Ok(result);
        };

        let (address_status, address_label) =
            self.classify_address(group.id, to_address).await?;

        let rules = policy_set.rules_by_priority();
        let snapshot_hash = policy_set.snapshot_hash.clone().unwrap_or_default();
        let mut matched: Vec<String> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();
        let mut terminal = None;
        let mut evaluated = 0usize;

        for rule in &rules {
            evaluated += 1;
            if !rule.matches(amount_wei, address_status) {
                continue;
            }
            matched.push(rule.rule_id.clone());
            reasons.push(
                rule.description
                    .clone()
                    .unwrap_or_else(|| format!("Matched rule {}", rule.rule_id)),
            );
            if rule.decision != RuleDecision::Continue {
                terminal = Some(*rule);
                break;
            }
            debug!(rule_id = %rule.rule_id, "continue rule matched, scanning on");
        }

        let result = match terminal {
            Some(rule) => PolicyEvalResult {
                decision: rule.decision,
                allowed: rule.decision == RuleDecision::Allow,
                matched_rules: matched,
                reasons,
                kyt_required: rule.kyt_required,
                approval_required: rule.approval_required,
                approval_count: rule.approval_count,
                policy_version: policy_set.version_string(),
                policy_snapshot_hash: snapshot_hash,
                group_id: Some(group.id),
                group_name: Some(group.name.clone()),
                address_status,
                address_label,
                evaluated_at: Utc::now(),
                evaluated_rules_count: evaluated,
            },
            None => {
                let (rule_id, reason, decision, kyt, approval, count) = match address_status {
                    AddressStatus::Denylist => (
                        "DEFAULT_DENY",
                        "Address is in denylist (no explicit rule matched)",
                        RuleDecision::Block,
                        false,
                        false,
                        0,
                    ),
                    AddressStatus::Unknown => (
                        "DEFAULT_UNKNOWN",
                        "Address is not in allowlist",
                        RuleDecision::Block,
                        false,
                        false,
                        0,
                    ),
                    AddressStatus::Allowlist => (
                        "DEFAULT_ALLOW",
                        "Address is in allowlist (no specific rule matched, applying defaults)",
                        RuleDecision::Allow,
                        true,
                        true,
                        1,
                    ),
                };
                matched.push(rule_id.to_string());
                reasons.push(reason.to_string());
                PolicyEvalResult {
                    decision,
                    allowed: decision == RuleDecision::Allow,
                    matched_rules: matched,
                    reasons,
                    kyt_required: kyt,
                    approval_required: approval,
                    approval_count: count,
                    policy_version: policy_set.version_string(),
                    policy_snapshot_hash: snapshot_hash,
                    group_id: Some(group.id),
                    group_name: Some(group.name.clone()),
                    address_status,
                    address_label,
                    evaluated_at: Utc::now(),
                    evaluated_rules_count: rules.len(),
                }
            }
        };

        info!(
            user = %user_id,
            decision = ?result.decision,
            matched = ?result.matched_rules,
            policy = %result.policy_version,
            "policy evaluated"
        );
        self.log_evaluation(&result, tx_request_id, user_id, to_address, amount_wei, asset, correlation_id)
            .await?;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_evaluation(
        &self,
        result: &PolicyEvalResult,
        tx_request_id: Option<Uuid>,
        user_id: Uuid,
        to_address: &EthAddress,
        amount_wei: U256,
        asset: &str,
        correlation_id: &str,
    ) -> CoreResult<()> {
        let (entity_type, entity_id) = match tx_request_id {
            Some(id) => ("TX_REQUEST", id.to_string()),
            None => ("POLICY_EVAL", Uuid::new_v4().to_string()),
        };
        self.audit
            .log(
                AuditRecord::system(AuditEventType::TxPolicyEvaluated, correlation_id)
                    .actor(Some(user_id))
                    .entity(entity_type, entity_id)
                    .payload(json!({
                        "decision": result.decision,
                        "matched_rules": result.matched_rules,
                        "reasons": result.reasons,
                        "kyt_required": result.kyt_required,
                        "approval_required": result.approval_required,
                        "approval_count": result.approval_count,
                        "policy_version": result.policy_version,
                        "policy_snapshot_hash": result.policy_snapshot_hash,
                        "group_id": result.group_id.map(|g| g.to_string()),
                        "group_name": result.group_name,
                        "address_status": result.address_status,
                        "to_address": to_address.as_str(),
                        "asset": asset,
                        "amount_wei": amount_wei.to_string(),
                    })),
            )
            .await?;
        Ok(())
    }
}
