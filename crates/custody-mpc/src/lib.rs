//! # Custody MPC
//!
//! Coordination of remote signer nodes and the signing-permit interlock.
//!
//! ## Shape
//!
//! ```text
//! permit.rs      - issue / validate / consume HMAC-signed signing permits
//! wire.rs        - signer-node RPC messages + the compact wire permit
//! messages.rs    - normalization of user-party round payload formats
//! node.rs        - SignerNode port + framed bincode RPC client
//! sim.rs         - in-process simulated signer node (tests, demos)
//! session.rs     - task-owned session state machine with deadline watch
//! coordinator.rs - MpcCoordinator: DKG + signing drivers, quarantine
//! ```
//!
//! The permit is the security boundary: no signer participates without a
//! valid, unused, unexpired permit whose hash matches the exact message to
//! be signed, and a consumed permit can never authorize a second
//! signature.

pub mod coordinator;
pub mod messages;
pub mod node;
pub mod permit;
pub mod session;
pub mod sim;
pub mod wire;

pub use coordinator::{
    DkgCompletion, DkgRoundResult, MpcCoordinator, MpcSettings, SessionStarted, SigningRoundResult,
};
pub use messages::parse_round_payload;
pub use node::{RpcSignerClient, SignerNode};
pub use permit::{validate_permit, PermitService};
pub use session::{RoundOutcome, SessionInfo};
pub use sim::SimulatedSignerNode;
pub use wire::{PartyMessage, WirePermit};
