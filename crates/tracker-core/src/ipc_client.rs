use crate::ipc::{
    compute_proof, write_envelope, AuthOk, ClientAuth, ClientHello, IpcEnvelope, IpcRequest,
    IpcResponse, RequestEnvelope, ServerChallenge, CLIENT_ID, IPC_PROTOCOL_VERSION,
};
use anyhow::{anyhow, Result};
use rand::RngCore;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader, ReadHalf, WriteHalf};

type Stream = tokio::net::UnixStream;

/// An authenticated session with the tracker service. Requests on one
/// session carry strictly increasing nonces.
pub struct IpcClient {
    reader: BufReader<ReadHalf<Stream>>,
    writer: WriteHalf<Stream>,
    session_id: String,
    nonce: u64,
    line: String,
}

impl IpcClient {
    pub async fn connect(socket_path: &Path, secret: &[u8]) -> Result<Self> {
        let stream = Stream::connect(socket_path)
            .await
            .map_err(|e| anyhow!("ipc connect {}: {e}", socket_path.display()))?;

        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        let hello = IpcEnvelope::ClientHello(ClientHello {
            protocol_version: IPC_PROTOCOL_VERSION,
            client_id: CLIENT_ID.to_string(),
        });
        write_envelope(&mut writer, &hello).await?;

        let ServerChallenge {
            session_id,
            server_nonce,
        } = match read_envelope(&mut reader, &mut line).await? {
            IpcEnvelope::ServerChallenge(c) => c,
            IpcEnvelope::Error { message } => return Err(anyhow!(message)),
            _ => return Err(anyhow!("expected ServerChallenge")),
        };

        let mut nonce_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let client_nonce = hex::encode(nonce_bytes);
        let proof = compute_proof(secret, &server_nonce, &client_nonce)?;

        let auth = IpcEnvelope::ClientAuth(ClientAuth {
            session_id,
            client_nonce,
            proof,
        });
        write_envelope(&mut writer, &auth).await?;

        let AuthOk { session_id } = match read_envelope(&mut reader, &mut line).await? {
            IpcEnvelope::AuthOk(ok) => ok,
            IpcEnvelope::Error { message } => return Err(anyhow!(message)),
            _ => return Err(anyhow!("expected AuthOk")),
        };

        Ok(Self {
            reader,
            writer,
            session_id,
            nonce: 0,
            line,
        })
    }

    pub async fn request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.nonce += 1;
        let envelope = IpcEnvelope::Request(RequestEnvelope {
            session_id: self.session_id.clone(),
            nonce: self.nonce,
            request,
        });
        write_envelope(&mut self.writer, &envelope).await?;

        match read_envelope(&mut self.reader, &mut self.line).await? {
            IpcEnvelope::Response(env) if env.nonce == self.nonce => Ok(env.response),
            IpcEnvelope::Response(_) => Err(anyhow!("response nonce mismatch")),
            IpcEnvelope::Error { message } => Err(anyhow!(message)),
            _ => Err(anyhow!("unexpected response")),
        }
    }
}

/// One request on a fresh session.
pub async fn send_request(
    socket_path: &Path,
    secret: &[u8],
    request: IpcRequest,
) -> Result<IpcResponse> {
    let mut client = IpcClient::connect(socket_path, secret).await?;
    client.request(request).await
}

async fn read_envelope(
    reader: &mut BufReader<ReadHalf<Stream>>,
    line: &mut String,
) -> Result<IpcEnvelope> {
    line.clear();
    let n = reader.read_line(line).await?;
    if n == 0 {
        return Err(anyhow!("service closed the connection"));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
