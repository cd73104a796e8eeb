use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::control::{ControlRequest, ControlResponse, ControlStatus, TrackerStatus};
use crate::record::{DeletionEvent, EVENT_RECORD_SIZE};

pub const IPC_PROTOCOL_VERSION: u32 = 1;
pub const CLIENT_ID: &str = "tracker-cli";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerChallenge {
    pub session_id: String,
    pub server_nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAuth {
    pub session_id: String,
    pub client_nonce: String,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOk {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcEnvelope {
    ClientHello(ClientHello),
    ServerChallenge(ServerChallenge),
    ClientAuth(ClientAuth),
    AuthOk(AuthOk),
    Error { message: String },
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub request: IpcRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub response: IpcResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", content = "data")]
pub enum IpcRequest {
    Ping,
    AddTrackedFile { path: String, protected: bool },
    RemoveTrackedFile { path: String },
    GetDeleteEvent { buffer_len: usize },
    GetStatus,
}

impl IpcRequest {
    /// The control request this carries. `Ping` is answered by the transport.
    pub fn into_control(self) -> Option<ControlRequest> {
        match self {
            IpcRequest::Ping => None,
            IpcRequest::AddTrackedFile { path, protected } => {
                Some(ControlRequest::AddTrackedFile { path, protected })
            }
            IpcRequest::RemoveTrackedFile { path } => {
                Some(ControlRequest::RemoveTrackedFile { path })
            }
            IpcRequest::GetDeleteEvent { buffer_len } => {
                Some(ControlRequest::GetDeleteEvent { buffer_len })
            }
            IpcRequest::GetStatus => Some(ControlRequest::QueryStatus),
        }
    }

    pub fn next_event() -> Self {
        IpcRequest::GetDeleteEvent {
            buffer_len: EVENT_RECORD_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", content = "data")]
pub enum IpcResponse {
    Pong,
    Status { status: ControlStatus },
    /// Hex of one fixed-size event record.
    DeleteEvent { record: String },
    TrackerStatus { status: TrackerStatus },
}

impl From<ControlResponse> for IpcResponse {
    fn from(resp: ControlResponse) -> Self {
        match resp {
            ControlResponse::Status(status) => IpcResponse::Status { status },
            ControlResponse::Event(bytes) => IpcResponse::DeleteEvent {
                record: hex::encode(bytes),
            },
            ControlResponse::Tracker(status) => IpcResponse::TrackerStatus { status },
        }
    }
}

impl IpcResponse {
    pub fn decode_event(record: &str) -> Result<DeletionEvent> {
        let bytes = hex::decode(record).map_err(|e| anyhow!("event record is not hex: {e}"))?;
        Ok(DeletionEvent::decode(&bytes)?)
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub last_nonce: u64,
}

pub struct IpcAuthContext {
    shared_secret: Vec<u8>,
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl IpcAuthContext {
    pub fn new(shared_secret: Vec<u8>) -> Self {
        Self {
            shared_secret,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn verify_proof(&self, server_nonce: &str, client_nonce: &str, proof: &str) -> Result<bool> {
        verify_proof(&self.shared_secret, server_nonce, client_nonce, proof)
    }

    pub async fn register_session(&self, session_id: String) {
        let mut guard = self.sessions.lock().await;
        guard.insert(session_id, SessionState { last_nonce: 0 });
    }

    pub async fn end_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    pub async fn verify_and_update_nonce(&self, session_id: &str, nonce: u64) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session"))?;
        if nonce <= session.last_nonce {
            return Err(anyhow!("replay detected: nonce not increasing"));
        }
        session.last_nonce = nonce;
        Ok(())
    }
}

fn proof_mac(secret: &[u8], server_nonce: &str, client_nonce: &str) -> Result<Hmac<Sha256>> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).map_err(|e| anyhow!("mac init: {e}"))?;
    mac.update(server_nonce.as_bytes());
    mac.update(client_nonce.as_bytes());
    Ok(mac)
}

pub(crate) fn compute_proof(secret: &[u8], server_nonce: &str, client_nonce: &str) -> Result<String> {
    let mac = proof_mac(secret, server_nonce, client_nonce)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex proof in constant time. Malformed hex is a mismatch.
pub(crate) fn verify_proof(
    secret: &[u8],
    server_nonce: &str,
    client_nonce: &str,
    proof: &str,
) -> Result<bool> {
    let Ok(proof) = hex::decode(proof) else {
        return Ok(false);
    };
    let mac = proof_mac(secret, server_nonce, client_nonce)?;
    Ok(mac.verify_slice(&proof).is_ok())
}

pub(crate) async fn write_envelope<W>(writer: &mut W, envelope: &IpcEnvelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(serde_json::to_string(envelope)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub struct IpcServer {
    auth: Arc<IpcAuthContext>,
    socket_path: std::path::PathBuf,
}

impl IpcServer {
    pub fn new(auth_secret: Vec<u8>, socket_path: std::path::PathBuf) -> Self {
        Self {
            auth: Arc::new(IpcAuthContext::new(auth_secret)),
            socket_path,
        }
    }

    pub async fn start(self: Arc<Self>, handler: Arc<dyn IpcHandler + Send + Sync>) -> Result<()> {
        use tokio::net::UnixListener;
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        debug!(socket = %self.socket_path.display(), "ipc listening");
        loop {
            let (stream, _addr) = listener.accept().await?;
            let auth = self.auth.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, auth, handler).await {
                    warn!(error = %e, "ipc connection error");
                }
            });
        }
    }
}

#[async_trait::async_trait]
pub trait IpcHandler {
    async fn handle(&self, req: ControlRequest) -> Result<ControlResponse>;
}

async fn handle_connection<S>(
    stream: S,
    auth: Arc<IpcAuthContext>,
    handler: Arc<dyn IpcHandler + Send + Sync>,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(anyhow!("empty hello"));
    }
    let envelope: IpcEnvelope = serde_json::from_str(line.trim_end())?;
    let hello = match envelope {
        IpcEnvelope::ClientHello(h) => h,
        _ => return Err(anyhow!("expected ClientHello")),
    };
    if hello.protocol_version != IPC_PROTOCOL_VERSION {
        let error = IpcEnvelope::Error {
            message: "protocol version mismatch".to_string(),
        };
        write_envelope(&mut writer, &error).await?;
        return Err(anyhow!("protocol version mismatch"));
    }
    if hello.client_id != CLIENT_ID {
        return Err(anyhow!("unauthorized client"));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut server_nonce_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut server_nonce_bytes);
    let server_nonce = hex::encode(server_nonce_bytes);

    let challenge = IpcEnvelope::ServerChallenge(ServerChallenge {
        session_id: session_id.clone(),
        server_nonce: server_nonce.clone(),
    });
    write_envelope(&mut writer, &challenge).await?;

    line.clear();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(anyhow!("missing client auth"));
    }
    let envelope: IpcEnvelope = serde_json::from_str(line.trim_end())?;
    let auth_msg = match envelope {
        IpcEnvelope::ClientAuth(m) => m,
        _ => return Err(anyhow!("expected ClientAuth")),
    };
    if auth_msg.session_id != session_id {
        return Err(anyhow!("session id mismatch"));
    }
    if !auth.verify_proof(&server_nonce, &auth_msg.client_nonce, &auth_msg.proof)? {
        let error = IpcEnvelope::Error {
            message: "authentication failed".to_string(),
        };
        write_envelope(&mut writer, &error).await?;
        return Err(anyhow!("invalid proof"));
    }

    auth.register_session(session_id.clone()).await;
    let ok = IpcEnvelope::AuthOk(AuthOk {
        session_id: session_id.clone(),
    });
    write_envelope(&mut writer, &ok).await?;
    debug!(session = %session_id, "ipc session established");

    let result = serve_requests(&mut reader, &mut writer, &auth, &handler, &session_id).await;
    auth.end_session(&session_id).await;
    result
}

async fn serve_requests<R, W>(
    reader: &mut R,
    writer: &mut W,
    auth: &IpcAuthContext,
    handler: &Arc<dyn IpcHandler + Send + Sync>,
    session_id: &str,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let env: IpcEnvelope = serde_json::from_str(line.trim_end())?;
        let req_env = match env {
            IpcEnvelope::Request(r) => r,
            _ => return Err(anyhow!("expected Request envelope")),
        };
        if req_env.session_id != session_id {
            return Err(anyhow!("session mismatch"));
        }
        auth.verify_and_update_nonce(session_id, req_env.nonce).await?;

        let reply = match req_env.request.into_control() {
            None => Ok(IpcResponse::Pong),
            Some(control) => handler.handle(control).await.map(IpcResponse::from),
        };
        let envelope = match reply {
            Ok(response) => IpcEnvelope::Response(ResponseEnvelope {
                session_id: session_id.to_string(),
                nonce: req_env.nonce,
                response,
            }),
            Err(e) => IpcEnvelope::Error {
                message: e.to_string(),
            },
        };
        write_envelope(writer, &envelope).await?;
    }
}
