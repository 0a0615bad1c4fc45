//! In-process simulated signer node.
//!
//! Stands in for a remote share-holder in tests and demo deployments: the
//! protocol rounds are stubbed, but key generation, permit verification,
//! and signatures are real (secp256k1 via `shared-crypto`), so everything
//! downstream (address derivation, EIP-155 assembly, signature recovery)
//! exercises the production code paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rand::RngCore;
use uuid::Uuid;

use shared_crypto::EcdsaKeyPair;
use shared_types::{CoreResult, ErrorCategory};

use crate::node::SignerNode;
use crate::wire::{
    DkgOutput, DkgRoundReply, HealthInfo, KeysetInfo, NodeError, RoundRequest, SignerRequest,
    SignerResponse, SigningOutput, SigningRoundReply, StartDkgRequest, StartReply,
    StartSigningRequest,
};

const DKG_ROUNDS: u32 = 3;
const SIGNING_ROUNDS: u32 = 2;

struct StoredKeyset {
    secret: [u8; 32],
    wallet_id: String,
    public_key: Vec<u8>,
    ethereum_address: String,
    created_at: i64,
    last_used_at: Option<i64>,
}

enum NodeSession {
    Dkg { wallet_id: String },
    Signing { keyset_id: String, message_hash: [u8; 32] },
}

/// Simulated share-holder node.
pub struct SimulatedSignerNode {
    permit_key: Vec<u8>,
    keysets: RwLock<HashMap<String, StoredKeyset>>,
    sessions: RwLock<HashMap<String, NodeSession>>,
    /// When set, the next round reply is a malformed-share protocol
    /// violation (quarantine-path testing).
    poison_next_round: AtomicBool,
}

impl SimulatedSignerNode {
    pub fn new(permit_key: &[u8]) -> Self {
        Self {
            permit_key: permit_key.to_vec(),
            keysets: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            poison_next_round: AtomicBool::new(false),
        }
    }

    /// Script a protocol violation into the next round reply.
    pub fn poison_next_round(&self) {
        self.poison_next_round.store(true, Ordering::SeqCst);
    }

    fn opaque_round_message() -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    fn poisoned(&self) -> bool {
        self.poison_next_round.swap(false, Ordering::SeqCst)
    }

    /// Serve one framed request; lets tests run the node behind
    /// [`crate::RpcSignerClient`] without a separate process.
    pub async fn serve_request(&self, request: SignerRequest) -> SignerResponse {
        match request {
            SignerRequest::Health => match self.health().await {
                Ok(info) => SignerResponse::Health(info),
                Err(e) => SignerResponse::Rejected(NodeError {
                    category: ErrorCategory::Permanent,
                    message: e.to_string(),
                }),
            },
            SignerRequest::StartDkg(req) => match self.start_dkg(req).await {
                Ok(reply) => SignerResponse::DkgStarted(reply),
                Err(e) => SignerResponse::Rejected(NodeError {
                    category: ErrorCategory::Permanent,
                    message: e.to_string(),
                }),
            },
            SignerRequest::DkgRound(req) => match self.dkg_round(req).await {
                Ok(reply) => SignerResponse::DkgRound(reply),
                Err(e) => SignerResponse::Rejected(NodeError {
                    category: ErrorCategory::Permanent,
                    message: e.to_string(),
                }),
            },
            SignerRequest::StartSigning(req) => match self.start_signing(req).await {
                Ok(reply) => SignerResponse::SigningStarted(reply),
                Err(e) => SignerResponse::Rejected(NodeError {
                    category: ErrorCategory::Permanent,
                    message: e.to_string(),
                }),
            },
            SignerRequest::SigningRound(req) => match self.signing_round(req).await {
                Ok(reply) => SignerResponse::SigningRound(reply),
                Err(e) => SignerResponse::Rejected(NodeError {
                    category: ErrorCategory::Permanent,
                    message: e.to_string(),
                }),
            },
            SignerRequest::GetKeysetInfo { keyset_id } => {
                SignerResponse::KeysetInfo(self.keyset_info(&keyset_id).await.unwrap_or(None))
            }
        }
    }
}

#[async_trait]
impl SignerNode for SimulatedSignerNode {
    fn node_id(&self) -> String {
        "sim-node-0".to_string()
    }

    async fn health(&self) -> CoreResult<HealthInfo> {
        Ok(HealthInfo {
            healthy: true,
            version: "sim-1.0.0".to_string(),
            active_sessions: self.sessions.read().len() as u32,
            stored_keysets: self.keysets.read().len() as u32,
        })
    }

    async fn start_dkg(&self, request: StartDkgRequest) -> CoreResult<StartReply> {
        if request.threshold == 0 || request.threshold > request.total_parties {
            return Ok(StartReply {
                success: false,
                round1_msg: None,
                error: Some(NodeError {
                    category: ErrorCategory::Permanent,
                    message: format!(
                        "invalid threshold {}-of-{}",
                        request.threshold, request.total_parties
                    ),
                }),
            });
        }
        self.sessions.write().insert(
            request.session_id.clone(),
            NodeSession::Dkg {
                wallet_id: request.wallet_id,
            },
        );
        Ok(StartReply {
            success: true,
            round1_msg: Some(Self::opaque_round_message()),
            error: None,
        })
    }

    async fn dkg_round(&self, request: RoundRequest) -> CoreResult<DkgRoundReply> {
        if self.poisoned() {
            return Ok(DkgRoundReply {
                success: false,
                outgoing: None,
                result: None,
                is_final: false,
                error: Some(NodeError {
                    category: ErrorCategory::ProtocolViolation,
                    message: "malformed share in round message".to_string(),
                }),
            });
        }

        let wallet_id = {
            let sessions = self.sessions.read();
            match sessions.get(&request.session_id) {
                Some(NodeSession::Dkg { wallet_id }) => wallet_id.clone(),
                _ => {
                    return Ok(DkgRoundReply {
                        success: false,
                        outgoing: None,
                        result: None,
                        is_final: false,
                        error: Some(NodeError {
                            category: ErrorCategory::Permanent,
                            message: format!("unknown dkg session {}", request.session_id),
                        }),
                    })
                }
            }
        };

        if request.round < DKG_ROUNDS {
            return Ok(DkgRoundReply {
                success: true,
                outgoing: Some(Self::opaque_round_message()),
                result: None,
                is_final: false,
                error: None,
            });
        }

        // Terminal round: materialize the keyset.
        let keypair = EcdsaKeyPair::generate();
        let keyset_id = Uuid::new_v4().to_string();
        let public_key = keypair.public_key_uncompressed().to_vec();
        let public_key_compressed = keypair.public_key_compressed().to_vec();
        let ethereum_address = keypair.address();
        self.keysets.write().insert(
            keyset_id.clone(),
            StoredKeyset {
                secret: keypair.to_bytes(),
                wallet_id,
                public_key: public_key.clone(),
                ethereum_address: ethereum_address.clone(),
                created_at: Utc::now().timestamp(),
                last_used_at: None,
            },
        );
        self.sessions.write().remove(&request.session_id);

        Ok(DkgRoundReply {
            success: true,
            outgoing: None,
            result: Some(DkgOutput {
                keyset_id,
                public_key,
                public_key_compressed,
                ethereum_address,
            }),
            is_final: true,
            error: None,
        })
    }

    async fn start_signing(&self, request: StartSigningRequest) -> CoreResult<StartReply> {
        let refuse = |category: ErrorCategory, message: String| {
            Ok(StartReply {
                success: false,
                round1_msg: None,
                error: Some(NodeError { category, message }),
            })
        };

        // The node never signs without re-verifying the permit itself.
        if !request.permit.verify(&self.permit_key, Utc::now()) {
            return refuse(
                ErrorCategory::Permanent,
                "permit rejected: invalid or expired coordinator signature".to_string(),
            );
        }
        if request.permit.tx_hash != request.message_hash {
            return refuse(
                ErrorCategory::Permanent,
                "permit rejected: tx_hash mismatch".to_string(),
            );
        }
        if request.permit.keyset_id != request.keyset_id {
            return refuse(
                ErrorCategory::Permanent,
                "permit rejected: keyset mismatch".to_string(),
            );
        }
        if !self.keysets.read().contains_key(&request.keyset_id) {
            return refuse(
                ErrorCategory::Permanent,
                format!("unknown keyset {}", request.keyset_id),
            );
        }

        self.sessions.write().insert(
            request.session_id.clone(),
            NodeSession::Signing {
                keyset_id: request.keyset_id,
                message_hash: request.message_hash,
            },
        );
        Ok(StartReply {
            success: true,
            round1_msg: Some(Self::opaque_round_message()),
            error: None,
        })
    }

    async fn signing_round(&self, request: RoundRequest) -> CoreResult<SigningRoundReply> {
        if self.poisoned() {
            return Ok(SigningRoundReply {
                success: false,
                outgoing: None,
                result: None,
                is_final: false,
                error: Some(NodeError {
                    category: ErrorCategory::ProtocolViolation,
                    message: "malformed partial signature".to_string(),
                }),
            });
        }

        let (keyset_id, message_hash) = {
            let sessions = self.sessions.read();
            match sessions.get(&request.session_id) {
                Some(NodeSession::Signing {
                    keyset_id,
                    message_hash,
                }) => (keyset_id.clone(), *message_hash),
                _ => {
                    return Ok(SigningRoundReply {
                        success: false,
                        outgoing: None,
                        result: None,
                        is_final: false,
                        error: Some(NodeError {
                            category: ErrorCategory::Permanent,
                            message: format!("unknown signing session {}", request.session_id),
                        }),
                    })
                }
            }
        };

        if request.round < SIGNING_ROUNDS {
            return Ok(SigningRoundReply {
                success: true,
                outgoing: Some(Self::opaque_round_message()),
                result: None,
                is_final: false,
                error: None,
            });
        }

        let signature = {
            let mut keysets = self.keysets.write();
            let keyset = match keysets.get_mut(&keyset_id) {
                Some(k) => k,
                None => {
                    return Ok(SigningRoundReply {
                        success: false,
                        outgoing: None,
                        result: None,
                        is_final: false,
                        error: Some(NodeError {
                            category: ErrorCategory::Permanent,
                            message: format!("keyset {keyset_id} disappeared"),
                        }),
                    })
                }
            };
            keyset.last_used_at = Some(Utc::now().timestamp());
            let keypair = match EcdsaKeyPair::from_bytes(&keyset.secret) {
                Ok(k) => k,
                Err(e) => {
                    return Ok(SigningRoundReply {
                        success: false,
                        outgoing: None,
                        result: None,
                        is_final: false,
                        error: Some(NodeError {
                            category: ErrorCategory::Permanent,
                            message: format!("share unusable: {e}"),
                        }),
                    })
                }
            };
            match keypair.sign_prehash(&message_hash) {
                Ok(sig) => sig,
                Err(e) => {
                    return Ok(SigningRoundReply {
                        success: false,
                        outgoing: None,
                        result: None,
                        is_final: false,
                        error: Some(NodeError {
                            category: ErrorCategory::Permanent,
                            message: format!("signing failed: {e}"),
                        }),
                    })
                }
            }
        };
        self.sessions.write().remove(&request.session_id);

        Ok(SigningRoundReply {
            success: true,
            outgoing: None,
            result: Some(SigningOutput {
                r: signature.r,
                s: signature.s,
                v: signature.v,
                full_signature: signature.to_bytes().to_vec(),
            }),
            is_final: true,
            error: None,
        })
    }

    async fn keyset_info(&self, keyset_id: &str) -> CoreResult<Option<KeysetInfo>> {
        Ok(self.keysets.read().get(keyset_id).map(|k| KeysetInfo {
            keyset_id: keyset_id.to_string(),
            wallet_id: k.wallet_id.clone(),
            public_key: k.public_key.clone(),
            ethereum_address: k.ethereum_address.clone(),
            created_at: k.created_at,
            last_used_at: k.last_used_at,
        }))
    }
}
