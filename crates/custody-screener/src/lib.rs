//! # Custody Screener
//!
//! Know-your-transaction screening for outbound recipients and inbound
//! senders.
//!
//! ## Composition
//!
//! 1. Local deny list → immediate `BLOCK`, no remote call.
//! 2. Local review list → `REVIEW`.
//! 3. Remote risk provider (when enabled), consulted through a TTL cache
//!    and a bounded-concurrency HTTP client. Provider risk levels map to
//!    verdicts (`none`/`low` → ALLOW, `medium`/`high` → REVIEW, `severe` →
//!    BLOCK, anything else → REVIEW).
//! 4. The **more restrictive** of local and remote wins.
//!
//! When the remote is unreachable, the fallback flag decides: degrade to
//! `UNCHECKED` (recorded prominently, treated as ALLOW downstream) or
//! promote to `REVIEW`.
//!
//! `REVIEW` opens a case for human adjudication; the pipeline halts until
//! an operator resolves it.

pub mod cache;
pub mod http;
pub mod mock;
pub mod ports;
pub mod service;

pub use cache::RiskCache;
pub use http::HttpRiskOracle;
pub use mock::HashRiskOracle;
pub use ports::{RiskLevel, RiskOracle};
pub use service::{ScreenerConfig, ScreeningService};
