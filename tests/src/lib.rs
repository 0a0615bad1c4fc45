//! # Custody Test Suite
//!
//! End-to-end scenarios and system invariants, run against the in-memory
//! store, the mock chain, and the simulated signer node - the same ports
//! production adapters implement.
//!
//! ## Layout
//!
//! - `harness` - one fully-wired core with seeded retail policy fixtures
//! - `integration::scenarios` - the end-to-end flows (fast path, large
//!   transfer, denylist block, permit tampering, audit tampering, SoD)
//! - `integration::properties` - cross-cutting invariants (transition
//!   soundness, audit chain shape, permit single-use, idempotency,
//!   explainability, ledger bound, nonce monotonicity)

pub mod harness;

#[cfg(test)]
mod integration {
    mod properties;
    mod scenarios;
}
