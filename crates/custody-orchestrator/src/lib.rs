//! # Custody Orchestrator
//!
//! The transaction state machine and the services around it.
//!
//! The orchestrator is the only place `TxRequest.status` is mutated: every
//! move goes through one guarded-transition primitive that checks the
//! legal-successor table, persists the new state, and emits a
//! `TX_STATUS_CHANGED` audit event with the business write.
//!
//! ## Outbound flow
//!
//! ```text
//! submit -> POLICY -> (KYT | skip) -> (APPROVALS | skip) -> SIGN_PENDING
//!        -> permit issued -> signing -> SIGNED -> BROADCAST_PENDING
//!        -> BROADCASTED -> CONFIRMING -> CONFIRMED -> FINALIZED
//! ```
//!
//! LOCAL_KEY custody signs synchronously inside the signing step; MPC
//! custody stops at permit issuance and resumes through the out-of-band
//! session rounds and [`Orchestrator::mpc_finalize`].
//!
//! ## Inbound flow
//!
//! The [`listener::ChainListener`] discovers transfers to monitored
//! addresses, records a `PENDING_ADMIN` deposit, screens the sender, and
//! waits for an explicit administrative credit or reject
//! ([`deposits::DepositAdmin`]). Only credited deposits count toward the
//! withdrawable balance of MPC wallets.

pub mod deposits;
pub mod listener;
pub mod service;
pub mod wallet;

pub use deposits::DepositAdmin;
pub use listener::ChainListener;
pub use service::{CreateTxRequest, Orchestrator};
pub use wallet::WalletRegistry;
