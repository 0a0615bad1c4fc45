//! Versioned policy sets, tiered rules, and evaluation results.

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a recipient address against a group's address book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressStatus {
    Allowlist,
    Denylist,
    Unknown,
}

impl AddressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowlist => "allowlist",
            Self::Denylist => "denylist",
            Self::Unknown => "unknown",
        }
    }
}

/// Outcome a rule imposes when it matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleDecision {
    Allow,
    Block,
    /// The rule matched but defers; evaluation continues with later rules.
    Continue,
}

/// A single normalized rule predicate.
///
/// Untyped condition bags are accepted only at the configuration boundary
/// and normalized into this form on insert; unknown keys are rejected there.
/// Amounts are stored in wei so evaluation is exact integer comparison.
/// A rule with no conditions matches unconditionally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleCondition {
    AmountLte { wei: U256 },
    AmountLt { wei: U256 },
    AmountGte { wei: U256 },
    AmountGt { wei: U256 },
    AddressIn { list: AddressStatus },
    AddressNotIn { list: AddressStatus },
    All { conditions: Vec<RuleCondition> },
    Any { conditions: Vec<RuleCondition> },
}

impl RuleCondition {
    /// Deterministic evaluation against the transaction facts.
    pub fn matches(&self, amount_wei: U256, address_status: AddressStatus) -> bool {
        match self {
            Self::AmountLte { wei } => amount_wei <= *wei,
            Self::AmountLt { wei } => amount_wei < *wei,
            Self::AmountGte { wei } => amount_wei >= *wei,
            Self::AmountGt { wei } => amount_wei > *wei,
            Self::AddressIn { list } => address_status == *list,
            Self::AddressNotIn { list } => address_status != *list,
            Self::All { conditions } => conditions
                .iter()
                .all(|c| c.matches(amount_wei, address_status)),
            Self::Any { conditions } => conditions
                .iter()
                .any(|c| c.matches(amount_wei, address_status)),
        }
    }
}

/// One rule inside a policy set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: Uuid,
    /// Operator-facing label, e.g. `RET-01`. Unique within the set.
    pub rule_id: String,
    /// Smaller wins. Independent of `rule_id` so operators can insert
    /// higher-precedence exceptions without renaming rules.
    pub priority: i32,
    /// Conjunction of predicates; empty means match-all.
    pub conditions: Vec<RuleCondition>,
    pub decision: RuleDecision,
    pub kyt_required: bool,
    pub approval_required: bool,
    pub approval_count: u32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PolicyRule {
    /// True iff every condition holds (empty conditions match).
    pub fn matches(&self, amount_wei: U256, address_status: AddressStatus) -> bool {
        self.conditions
            .iter()
            .all(|c| c.matches(amount_wei, address_status))
    }
}

/// A versioned, ordered collection of rules.
///
/// `(name, version)` is unique; only one active version per name is expected
/// for group assignment. `snapshot_hash` commits to the current rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicySet {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub description: Option<String>,
    pub is_active: bool,
    pub snapshot_hash: Option<String>,
    pub rules: Vec<PolicyRule>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PolicySet {
    /// Human label, e.g. `"Retail Policy v3"`.
    pub fn version_string(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }

    /// Rules sorted by ascending priority, ties broken by insertion order.
    pub fn rules_by_priority(&self) -> Vec<&PolicyRule> {
        let mut sorted: Vec<&PolicyRule> = self.rules.iter().collect();
        sorted.sort_by_key(|r| r.priority);
        sorted
    }
}

/// Full, explainable result of one policy evaluation. Stored verbatim on the
/// transaction request and in the `TX_POLICY_EVALUATED` audit payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyEvalResult {
    /// `ALLOW` or `BLOCK`.
    pub decision: RuleDecision,
    pub allowed: bool,
    /// Rule ids that fired, in evaluation order. Synthetic ids
    /// (`NO_GROUP`, `NO_POLICY`, `DEFAULT_*`) mark the fallback branches.
    pub matched_rules: Vec<String>,
    pub reasons: Vec<String>,
    pub kyt_required: bool,
    pub approval_required: bool,
    pub approval_count: u32,
    /// e.g. `"Retail Policy v3"`.
    pub policy_version: String,
    pub policy_snapshot_hash: String,
    pub group_id: Option<Uuid>,
    pub group_name: Option<String>,
    pub address_status: AddressStatus,
    pub address_label: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    pub evaluated_rules_count: usize,
}

impl PolicyEvalResult {
    /// A terminal BLOCK carrying a synthetic rule id (fallback branches).
    pub fn blocked(rule_id: &str, reason: &str) -> Self {
        Self {
            decision: RuleDecision::Block,
            allowed: false,
            matched_rules: vec![rule_id.to_string()],
            reasons: vec![reason.to_string()],
            kyt_required: false,
            approval_required: false,
            approval_count: 0,
            policy_version: String::new(),
            policy_snapshot_hash: String::new(),
            group_id: None,
            group_name: None,
            address_status: AddressStatus::Unknown,
            address_label: None,
            evaluated_at: Utc::now(),
            evaluated_rules_count: 0,
        }
    }
}

/// A user group with a policy assignment and an address book.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Allow/deny entry in a group's address book.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressKind {
    Allow,
    Deny,
}

/// One address-book row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub id: Uuid,
    pub group_id: Uuid,
    pub address: crate::entities::EthAddress,
    pub kind: AddressKind,
    pub label: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
