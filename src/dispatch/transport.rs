//! TCP transport to miner modules
//!
//! Each call opens a fresh connection, writes one length-prefixed JSON
//! envelope (4-byte big-endian length, then the body) and reads one
//! length-prefixed reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{PeerTransport, TransportError};
use crate::protocol::MetricRequest;
use crate::types::{PeerIdentity, PeerInfo};

/// Default maximum reply size (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Call envelope sent to a miner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Key of the miner the call is meant for
    pub target_key: String,

    /// Key of the calling validator
    pub caller_key: String,

    /// Miner-side method name
    pub method: String,

    /// `{"synapse": <request>}`
    pub params: serde_json::Value,

    pub timestamp: i64,
}

/// Reply envelope returned by a miner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReply {
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// `PeerTransport` speaking length-prefixed JSON over TCP
pub struct TcpTransport {
    caller: PeerIdentity,
    max_message_size: usize,
}

impl TcpTransport {
    pub fn new(caller: PeerIdentity) -> Self {
        Self {
            caller,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    async fn exchange(
        &self,
        peer: &PeerInfo,
        request: &MetricRequest,
    ) -> Result<Vec<u8>, TransportError> {
        let addr = peer.address.to_string();
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", addr, e)))?;

        let synapse = serde_json::to_value(request).map_err(|e| TransportError::Io(e.to_string()))?;
        let envelope = CallEnvelope {
            target_key: peer.identity.as_str().to_string(),
            caller_key: self.caller.as_str().to_string(),
            method: request.rpc_method(),
            params: serde_json::json!({ "synapse": synapse }),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let body = serde_json::to_vec(&envelope).map_err(|e| TransportError::Io(e.to_string()))?;

        write_frame(&mut stream, &body).await?;
        let reply_bytes = read_frame(&mut stream, self.max_message_size).await?;

        let reply: CallReply = serde_json::from_slice(&reply_bytes)
            .map_err(|e| TransportError::Remote(format!("unreadable reply: {}", e)))?;

        if let Some(error) = reply.error {
            return Err(TransportError::Remote(error));
        }

        let result = reply
            .result
            .ok_or_else(|| TransportError::Remote("empty reply".to_string()))?;

        // Miners may return the payload JSON-encoded inside a string
        match result {
            serde_json::Value::String(inner) => Ok(inner.into_bytes()),
            other => serde_json::to_vec(&other).map_err(|e| TransportError::Io(e.to_string())),
        }
    }
}

#[async_trait]
impl PeerTransport for TcpTransport {
    async fn call(
        &self,
        peer: &PeerInfo,
        request: &MetricRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        tokio::time::timeout(timeout, self.exchange(peer, request))
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

/// Write one length-prefixed frame
pub async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<(), TransportError> {
    let len_bytes = (body.len() as u32).to_be_bytes();

    stream.write_all(&len_bytes).await.map_err(io_error)?;
    stream.write_all(body).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    Ok(())
}

/// Read one length-prefixed frame, refusing anything over `max_size`
pub async fn read_frame(
    stream: &mut TcpStream,
    max_size: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(io_error)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_size {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(io_error)?;
    Ok(body)
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryParams;
    use crate::types::{PeerAddress, PeerId};
    use tokio::net::TcpListener;

    /// Serve a single connection with `reply`, returning the envelope seen
    async fn serve_once(reply: Vec<u8>) -> (u16, tokio::task::JoinHandle<CallEnvelope>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let body = read_frame(&mut stream, MAX_MESSAGE_SIZE).await.unwrap();
            let envelope: CallEnvelope = serde_json::from_slice(&body).unwrap();
            write_frame(&mut stream, &reply).await.unwrap();
            envelope
        });

        (port, handle)
    }

    fn local_peer(port: u16) -> PeerInfo {
        PeerInfo {
            id: PeerId(1),
            address: PeerAddress { host: "127.0.0.1".to_string(), port },
            identity: PeerIdentity::new("5Miner1"),
        }
    }

    #[tokio::test]
    async fn test_round_trip_over_loopback() {
        let reply = serde_json::json!({
            "result": { "class_name": "TokenMetricResponse" }
        });
        let (port, server) = serve_once(serde_json::to_vec(&reply).unwrap()).await;

        let transport = TcpTransport::new(PeerIdentity::new("5Validator"));
        let request = QueryParams::default().token_metric();
        let bytes = transport
            .call(&local_peer(port), &request, Duration::from_secs(5))
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["class_name"], "TokenMetricResponse");

        let envelope = server.await.unwrap();
        assert_eq!(envelope.method, "forwardTokenMetricSynapse");
        assert_eq!(envelope.target_key, "5Miner1");
        assert_eq!(envelope.caller_key, "5Validator");
        assert_eq!(envelope.params["synapse"]["class_name"], "TokenMetricSynapse");
    }

    #[tokio::test]
    async fn test_string_encoded_result() {
        let reply = serde_json::json!({
            "result": "{\"class_name\":\"TokenMetricResponse\"}"
        });
        let (port, _server) = serve_once(serde_json::to_vec(&reply).unwrap()).await;

        let transport = TcpTransport::new(PeerIdentity::new("5Validator"));
        let bytes = transport
            .call(&local_peer(port), &QueryParams::default().token_metric(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(bytes, br#"{"class_name":"TokenMetricResponse"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_remote_error() {
        let reply = serde_json::json!({ "error": "miner overloaded" });
        let (port, _server) = serve_once(serde_json::to_vec(&reply).unwrap()).await;

        let transport = TcpTransport::new(PeerIdentity::new("5Validator"));
        let err = transport
            .call(&local_peer(port), &QueryParams::default().token_metric(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Remote("miner overloaded".to_string()));
    }

    #[tokio::test]
    async fn test_oversized_reply_rejected() {
        let (port, _server) = serve_once(vec![b' '; 64]).await;

        let transport =
            TcpTransport::new(PeerIdentity::new("5Validator")).with_max_message_size(16);
        let err = transport
            .call(&local_peer(port), &QueryParams::default().token_metric(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::FrameTooLarge(64));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = TcpTransport::new(PeerIdentity::new("5Validator"));
        let err = transport
            .call(&local_peer(port), &QueryParams::default().token_metric(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
