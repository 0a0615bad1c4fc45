//! Policy-set snapshot hashing.

use serde_json::json;

use shared_crypto::canonical_json_sha256;
use shared_types::{CoreError, CoreResult, PolicyRule};

/// SHA-256 over the canonical serialization of a rule list, sorted by
/// priority. This is the commitment stored on the policy set and echoed
/// into every evaluation result, letting an auditor prove which exact rules
/// produced a decision.
pub fn rules_snapshot_hash(rules: &[PolicyRule]) -> CoreResult<String> {
    let mut sorted: Vec<&PolicyRule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.priority);

    let material: Vec<_> = sorted
        .iter()
        .map(|r| {
            json!({
                "rule_id": r.rule_id,
                "priority": r.priority,
                "conditions": r.conditions,
                "decision": r.decision,
                "kyt_required": r.kyt_required,
                "approval_required": r.approval_required,
                "approval_count": r.approval_count,
            })
        })
        .collect();

    canonical_json_sha256(&material).map_err(|e| CoreError::Serialization(e.to_string()))
}
