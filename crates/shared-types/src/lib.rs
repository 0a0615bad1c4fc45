//! # Shared Types
//!
//! Domain entities and status machines for the custody transaction core.
//!
//! ## Contents
//!
//! | Module | Types |
//! |--------|-------|
//! | `entities` | Identifiers, `EthAddress`, timestamp formatting |
//! | `wallet` | `Wallet`, custody backends, wallet lifecycle |
//! | `tx` | `TxRequest`, `TxStatus` + legal-transition table, `Approval` |
//! | `policy` | `PolicySet`, `PolicyRule`, `RuleCondition`, `PolicyEvalResult` |
//! | `audit` | `AuditEvent`, `AuditEventType`, actor kinds |
//! | `kyt` | Screening verdicts, `KytCase`, `Deposit` |
//! | `mpc` | `SigningPermit`, session kinds/status, error taxonomy |
//! | `errors` | The single `CoreError` sum type |
//! | `units` | Decimal-string ↔ wei conversion |
//! | `config` | `CoreConfig` with environment loading |
//!
//! Every other crate in the workspace depends on this one; it depends on
//! nothing but serialization and numeric primitives.

pub mod audit;
pub mod config;
pub mod entities;
pub mod errors;
pub mod kyt;
pub mod mpc;
pub mod policy;
pub mod tx;
pub mod units;
pub mod wallet;

pub use audit::{ActorType, AuditEvent, AuditEventType};
pub use config::CoreConfig;
pub use entities::{rfc3339_micros, EthAddress};
pub use errors::{CoreError, CoreResult, PermitRejection};
pub use kyt::{CaseStatus, Deposit, DepositStatus, Direction, KytCase, Verdict};
pub use mpc::{
    ApprovalSnapshot, ErrorCategory, SessionKind, SessionStatus, SigningPermit, SigningSignature,
};
pub use policy::{
    AddressBookEntry, AddressKind, AddressStatus, Group, PolicyEvalResult, PolicyRule, PolicySet,
    RuleCondition, RuleDecision,
};
pub use tx::{Approval, ApprovalDecision, TxRequest, TxStatus};
pub use wallet::{CustodyBackend, DailyVolume, Wallet, WalletStatus, WalletType};
