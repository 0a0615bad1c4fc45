//! # Custody Store
//!
//! Persistence ports for the custody core and an in-memory reference
//! adapter.
//!
//! ## Layout
//!
//! ```text
//! ports.rs   - one repository trait per aggregate + the `Store` supertrait
//! memory.rs  - MemoryStore: tokio-RwLock-guarded maps implementing all ports
//! ```
//!
//! The production deployment backs these ports with a relational database:
//! one table per aggregate, monetary columns as decimal strings, the audit
//! log as a single append-only table indexed by `sequence_number` and
//! `(entity_type, entity_id)`. The contracts the services rely on are the
//! ones spelled out on the traits - uniqueness of idempotency keys, at most
//! one vote per `(request, user)`, a dense audit sequence, and single-shot
//! permit consumption - each enforced inside one write-lock critical
//! section, the in-memory equivalent of a row-level lock.

pub mod memory;
pub mod ports;

pub use memory::MemoryStore;
pub use ports::{
    ApprovalStore, AuditStore, CaseStore, DepositStore, GroupStore, PermitStore, PolicyStore,
    Store, TxStore, VolumeStore, WalletStore,
};
