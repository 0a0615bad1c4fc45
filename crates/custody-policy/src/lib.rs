//! # Custody Policy
//!
//! The tiered policy engine and its administration services.
//!
//! A transaction is evaluated against its submitter's group: the group's
//! address book classifies the recipient, and the group's active, versioned
//! policy set is scanned in ascending priority order. The first terminal
//! rule wins and dictates the decision plus the control requirements (KYT,
//! approvals). Every evaluation produces a fully explainable
//! `PolicyEvalResult` and a `TX_POLICY_EVALUATED` audit event.
//!
//! Untyped rule-condition bags (`{"amount_lte": "0.001", "address_in":
//! "allowlist"}`) are accepted only at the configuration boundary and
//! normalized into the tagged `RuleCondition` form on insert; unknown keys
//! are rejected there, never at evaluation time.

pub mod admin;
pub mod engine;
pub mod normalize;
pub mod snapshot;

pub use admin::{AddressBookService, GroupService, PolicySetService};
pub use engine::PolicyEngine;
pub use normalize::normalize_conditions;
pub use snapshot::rules_snapshot_hash;
