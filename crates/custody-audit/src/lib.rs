//! # Custody Audit
//!
//! Tamper-evident audit logging for the custody core.
//!
//! Every state change, policy evaluation, approval, and signing event lands
//! here as an append-only record. Each record's `hash` covers the canonical
//! JSON of its identifying fields plus the previous record's hash, so any
//! after-the-fact edit breaks the chain at the edited record and everything
//! downstream of it.
//!
//! ## Pieces
//!
//! - [`AuditService::log`] - append one event, assigning the next dense
//!   sequence number and linking `prev_hash`
//! - [`AuditService::verify_chain`] - read-only walk re-deriving every hash
//! - [`AuditService::build_package`] - per-request evidence bundle with a
//!   package-level commitment hash

mod package;
mod service;
mod verify;

pub use package::AuditPackage;
pub use service::{event_hash, AuditRecord, AuditService};
pub use verify::{ChainFinding, ChainVerification};
