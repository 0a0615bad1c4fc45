//! Signer-node RPC message types and the compact wire permit.
//!
//! The coordinator and the signer nodes speak a framed binary protocol:
//! each frame is a length-prefixed bincode-encoded [`SignerRequest`] /
//! [`SignerResponse`]. Round payloads are opaque byte strings; the
//! coordinator never parses their contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_crypto::hmac_sha256;
use shared_types::{CoreError, CoreResult, ErrorCategory, SigningPermit};

/// One party's message delivered into a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyMessage {
    pub from_party: u32,
    pub payload: Vec<u8>,
}

/// Compact permit form carried to signer nodes.
///
/// The node re-verifies the coordinator's HMAC over the concatenated
/// fields before participating; a node never signs on trust.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePermit {
    pub tx_request_id: String,
    pub wallet_id: String,
    pub keyset_id: String,
    pub tx_hash: [u8; 32],
    /// Unix seconds.
    pub expires_at: i64,
    pub coordinator_signature: [u8; 32],
}

fn wire_material(permit: &WirePermit) -> Vec<u8> {
    let mut material = Vec::new();
    material.extend_from_slice(permit.tx_request_id.as_bytes());
    material.extend_from_slice(permit.wallet_id.as_bytes());
    material.extend_from_slice(permit.keyset_id.as_bytes());
    material.extend_from_slice(&permit.tx_hash);
    material.extend_from_slice(permit.expires_at.to_string().as_bytes());
    material
}

fn wire_mac(key: &[u8], permit: &WirePermit) -> [u8; 32] {
    hmac_sha256(key, &wire_material(permit))
}

impl WirePermit {
    /// Recompute and install the coordinator MAC over the current fields.
    pub fn seal(&mut self, key: &[u8]) {
        self.coordinator_signature = wire_mac(key, self);
    }

    /// Derive the wire form from a persisted permit.
    pub fn from_permit(permit: &SigningPermit, key: &[u8]) -> CoreResult<Self> {
        let digest = hex::decode(permit.tx_hash.trim_start_matches("0x"))
            .map_err(|e| CoreError::Serialization(format!("permit tx_hash hex: {e}")))?;
        let tx_hash: [u8; 32] = digest
            .try_into()
            .map_err(|_| CoreError::Serialization("permit tx_hash must be 32 bytes".into()))?;
        let mut wire = Self {
            tx_request_id: permit.tx_request_id.to_string(),
            wallet_id: permit.wallet_id.to_string(),
            keyset_id: permit.keyset_id.clone(),
            tx_hash,
            expires_at: permit.expires_at.timestamp(),
            coordinator_signature: [0u8; 32],
        };
        wire.coordinator_signature = wire_mac(key, &wire);
        Ok(wire)
    }

    /// Node-side verification: unexpired and authentically signed.
    /// The tag comparison goes through the MAC verifier, keeping it
    /// constant-time.
    pub fn verify(&self, key: &[u8], now: DateTime<Utc>) -> bool {
        if now.timestamp() > self.expires_at {
            return false;
        }
        shared_crypto::hmac_verify(key, &wire_material(self), &self.coordinator_signature)
    }
}

/// Signer health report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthInfo {
    pub healthy: bool,
    pub version: String,
    pub active_sessions: u32,
    pub stored_keysets: u32,
}

/// DKG output of the terminal round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgOutput {
    pub keyset_id: String,
    /// Uncompressed SEC1 public key (65 bytes).
    pub public_key: Vec<u8>,
    /// Compressed SEC1 public key (33 bytes).
    pub public_key_compressed: Vec<u8>,
    /// EIP-55 checksummed address derived from the public key.
    pub ethereum_address: String,
}

/// Signature output of the terminal signing round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningOutput {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// 27 or 28.
    pub v: u8,
    /// `r || s || v`.
    pub full_signature: Vec<u8>,
}

/// Stored-keyset metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeysetInfo {
    pub keyset_id: String,
    pub wallet_id: String,
    pub public_key: Vec<u8>,
    pub ethereum_address: String,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartDkgRequest {
    pub session_id: String,
    pub wallet_id: String,
    pub threshold: u16,
    pub total_parties: u16,
    pub party_index: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartSigningRequest {
    pub session_id: String,
    pub keyset_id: String,
    pub message_hash: [u8; 32],
    pub permit: WirePermit,
    pub party_index: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRequest {
    pub session_id: String,
    pub round: u32,
    pub incoming: Vec<PartyMessage>,
}

/// What a start call yields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StartReply {
    pub success: bool,
    pub round1_msg: Option<Vec<u8>>,
    pub error: Option<NodeError>,
}

/// What a round call yields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DkgRoundReply {
    pub success: bool,
    pub outgoing: Option<Vec<u8>>,
    pub result: Option<DkgOutput>,
    pub is_final: bool,
    pub error: Option<NodeError>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningRoundReply {
    pub success: bool,
    pub outgoing: Option<Vec<u8>>,
    pub result: Option<SigningOutput>,
    pub is_final: bool,
    pub error: Option<NodeError>,
}

/// Structured node-side failure with the coordinator's error taxonomy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeError {
    pub category: ErrorCategory,
    pub message: String,
}

/// Framed request envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SignerRequest {
    Health,
    StartDkg(StartDkgRequest),
    DkgRound(RoundRequest),
    StartSigning(StartSigningRequest),
    SigningRound(RoundRequest),
    GetKeysetInfo { keyset_id: String },
}

/// Framed response envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SignerResponse {
    Health(HealthInfo),
    DkgStarted(StartReply),
    DkgRound(DkgRoundReply),
    SigningStarted(StartReply),
    SigningRound(SigningRoundReply),
    KeysetInfo(Option<KeysetInfo>),
    /// Transport-level failure the node could attribute to the request.
    Rejected(NodeError),
}
