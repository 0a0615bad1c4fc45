//! Signer-node port and the framed RPC client.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use shared_types::{CoreError, CoreResult};

use crate::wire::{
    DkgRoundReply, HealthInfo, KeysetInfo, RoundRequest, SignerRequest, SignerResponse,
    SigningRoundReply, StartDkgRequest, StartReply, StartSigningRequest,
};

/// Maximum accepted frame size (defense against a corrupted peer).
const MAX_FRAME: u32 = 16 * 1024 * 1024;

/// A remote signer node as the coordinator sees it: an opaque round
/// function plus health and keyset metadata.
#[async_trait]
pub trait SignerNode: Send + Sync {
    /// A stable identifier for quarantine bookkeeping.
    fn node_id(&self) -> String;

    async fn health(&self) -> CoreResult<HealthInfo>;
    async fn start_dkg(&self, request: StartDkgRequest) -> CoreResult<StartReply>;
    async fn dkg_round(&self, request: RoundRequest) -> CoreResult<DkgRoundReply>;
    async fn start_signing(&self, request: StartSigningRequest) -> CoreResult<StartReply>;
    async fn signing_round(&self, request: RoundRequest) -> CoreResult<SigningRoundReply>;
    async fn keyset_info(&self, keyset_id: &str) -> CoreResult<Option<KeysetInfo>>;
}

/// Framed bincode RPC client over TCP.
///
/// One connection, re-established on failure. Every call carries a
/// deadline; transport failures surface as transient errors and reset the
/// connection so the next call starts clean.
pub struct RpcSignerClient {
    endpoint: String,
    timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl RpcSignerClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            timeout,
            conn: Mutex::new(None),
        }
    }

    async fn roundtrip(&self, request: &SignerRequest) -> CoreResult<SignerResponse> {
        let payload = bincode::serialize(request)
            .map_err(|e| CoreError::Serialization(format!("signer request: {e}")))?;

        let mut guard = self.conn.lock().await;
        let result = tokio::time::timeout(self.timeout, async {
            if guard.is_none() {
                debug!(endpoint = %self.endpoint, "connecting to signer node");
                *guard = Some(TcpStream::connect(&self.endpoint).await?);
            }
            let stream = guard.as_mut().expect("connection just established");

            stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
            stream.write_all(&payload).await?;
            stream.flush().await?;

            let mut len_bytes = [0u8; 4];
            stream.read_exact(&mut len_bytes).await?;
            let len = u32::from_le_bytes(len_bytes);
            if len > MAX_FRAME {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("oversized frame: {len}"),
                ));
            }
            let mut body = vec![0u8; len as usize];
            stream.read_exact(&mut body).await?;
            Ok::<Vec<u8>, std::io::Error>(body)
        })
        .await;

        let body = match result {
            Ok(Ok(body)) => body,
            Ok(Err(io_err)) => {
                *guard = None;
                return Err(CoreError::TransientRemote(format!(
                    "signer node i/o: {io_err}"
                )));
            }
            Err(_) => {
                *guard = None;
                return Err(CoreError::TransientRemote("signer node timed out".into()));
            }
        };

        bincode::deserialize(&body).map_err(|e| {
            CoreError::ProtocolViolation(format!("undecodable signer response: {e}"))
        })
    }

    fn unexpected(response: SignerResponse) -> CoreError {
        match response {
            SignerResponse::Rejected(err) => CoreError::PermanentRemote(err.message),
            other => CoreError::ProtocolViolation(format!(
                "signer answered with the wrong message kind: {other:?}"
            )),
        }
    }
}

#[async_trait]
impl SignerNode for RpcSignerClient {
    fn node_id(&self) -> String {
        self.endpoint.clone()
    }

    async fn health(&self) -> CoreResult<HealthInfo> {
        match self.roundtrip(&SignerRequest::Health).await? {
            SignerResponse::Health(info) => Ok(info),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn start_dkg(&self, request: StartDkgRequest) -> CoreResult<StartReply> {
        match self.roundtrip(&SignerRequest::StartDkg(request)).await? {
            SignerResponse::DkgStarted(reply) => Ok(reply),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn dkg_round(&self, request: RoundRequest) -> CoreResult<DkgRoundReply> {
        match self.roundtrip(&SignerRequest::DkgRound(request)).await? {
            SignerResponse::DkgRound(reply) => Ok(reply),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn start_signing(&self, request: StartSigningRequest) -> CoreResult<StartReply> {
        match self.roundtrip(&SignerRequest::StartSigning(request)).await? {
            SignerResponse::SigningStarted(reply) => Ok(reply),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn signing_round(&self, request: RoundRequest) -> CoreResult<SigningRoundReply> {
        match self.roundtrip(&SignerRequest::SigningRound(request)).await? {
            SignerResponse::SigningRound(reply) => Ok(reply),
            other => Err(Self::unexpected(other)),
        }
    }

    async fn keyset_info(&self, keyset_id: &str) -> CoreResult<Option<KeysetInfo>> {
        let request = SignerRequest::GetKeysetInfo {
            keyset_id: keyset_id.to_string(),
        };
        match self.roundtrip(&request).await? {
            SignerResponse::KeysetInfo(info) => Ok(info),
            other => Err(Self::unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_node_is_transient() {
        let client = RpcSignerClient::new("127.0.0.1:1", Duration::from_millis(200));
        let err = client.health().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_frames_roundtrip_against_echo_server() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut len_bytes = [0u8; 4];
            socket.read_exact(&mut len_bytes).await.unwrap();
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).await.unwrap();
            let request: SignerRequest = bincode::deserialize(&body).unwrap();
            assert!(matches!(request, SignerRequest::Health));

            let response = SignerResponse::Health(HealthInfo {
                healthy: true,
                version: "1.0.0".into(),
                active_sessions: 0,
                stored_keysets: 2,
            });
            let payload = bincode::serialize(&response).unwrap();
            socket
                .write_all(&(payload.len() as u32).to_le_bytes())
                .await
                .unwrap();
            socket.write_all(&payload).await.unwrap();
        });

        let client = RpcSignerClient::new(&addr.to_string(), Duration::from_secs(2));
        let health = client.health().await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.stored_keysets, 2);
    }
}
