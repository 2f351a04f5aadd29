//! Network-socket device adapter.
//!
//! Commands travel as newline-delimited JSON envelopes; the device answers
//! with one JSON object per line.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::DeviceAdapter;
use crate::error::{AppResult, EmitterError};

/// Adapter for devices that speak newline-delimited JSON over TCP.
pub struct TcpAdapter {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpAdapter {
    /// Create a disconnected adapter for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
            stream: None,
        }
    }

    /// Set the connect/command timeout.
    ///
    /// Default: 5 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl DeviceAdapter for TcpAdapter {
    fn protocol(&self) -> &'static str {
        "tcp"
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> AppResult<()> {
        let endpoint = self.endpoint();
        let stream = timeout(self.timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| EmitterError::Transport(format!("connect to {endpoint} timed out")))??;
        debug!(%endpoint, "tcp device connected");
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().shutdown().await;
            debug!(endpoint = %self.endpoint(), "tcp device disconnected");
        }
    }

    async fn send_command(&mut self, command: &str, params: &Value) -> AppResult<Value> {
        let stream = self.stream.as_mut().ok_or(EmitterError::DeviceNotConnected)?;

        let envelope = json!({
            "command": command,
            "parameters": params,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let mut frame = envelope.to_string();
        frame.push('\n');

        timeout(self.timeout, stream.get_mut().write_all(frame.as_bytes()))
            .await
            .map_err(|_| EmitterError::Transport("command write timed out".to_string()))??;

        let mut line = String::new();
        let read = timeout(self.timeout, stream.read_line(&mut line))
            .await
            .map_err(|_| EmitterError::Transport("response read timed out".to_string()))??;
        if read == 0 {
            self.stream = None;
            return Err(EmitterError::Transport(
                "connection closed by peer".to_string(),
            ));
        }

        debug!(command, response = line.trim(), "tcp command round trip");
        serde_json::from_str(line.trim())
            .map_err(|err| EmitterError::Protocol(format!("invalid response frame: {err}")))
    }

    async fn read_status(&mut self) -> AppResult<Value> {
        self.send_command("read_status", &json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// One-shot echo peer: accepts a connection, answers every command line
    /// with an ok frame naming the command it saw.
    async fn spawn_device() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let envelope: Value = serde_json::from_str(line.trim()).unwrap();
                let reply = json!({
                    "status": "ok",
                    "command": envelope["command"],
                });
                let mut frame = reply.to_string();
                frame.push('\n');
                reader.get_mut().write_all(frame.as_bytes()).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let addr = spawn_device().await;
        let mut adapter = TcpAdapter::new(addr.ip().to_string(), addr.port());
        adapter.connect().await.unwrap();
        assert!(adapter.is_connected());

        let response = adapter
            .send_command("move", &json!({"position_mm": 12.5}))
            .await
            .unwrap();
        assert_eq!(response["status"], "ok");
        assert_eq!(response["command"], "move");

        let status = adapter.read_status().await.unwrap();
        assert_eq!(status["command"], "read_status");

        adapter.disconnect().await;
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_connect_is_rejected() {
        let mut adapter = TcpAdapter::new("127.0.0.1", 9);
        let result = adapter.send_command("move", &json!({})).await;
        assert!(matches!(result, Err(EmitterError::DeviceNotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut adapter = TcpAdapter::new("127.0.0.1", 9);
        adapter.disconnect().await;
        adapter.disconnect().await;
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_invalid_response_frame_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut scratch = [0u8; 1024];
            let _ = stream.read(&mut scratch).await;
            stream.write_all(b"not json\n").await.unwrap();
        });

        let mut adapter = TcpAdapter::new(addr.ip().to_string(), addr.port());
        adapter.connect().await.unwrap();
        let result = adapter.send_command("move", &json!({})).await;
        assert!(matches!(result, Err(EmitterError::Protocol(_))));
    }
}
