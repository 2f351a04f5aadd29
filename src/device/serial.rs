//! Serial-line device adapter.
//!
//! Wraps the `serialport` crate and provides async I/O by running the
//! blocking reads/writes on Tokio's blocking task executor. Commands are
//! framed as `COMMAND:{json}\r\n`; the device answers with one JSON object
//! per line.

use async_trait::async_trait;
use serde_json::{json, Value};
use serialport::SerialPort;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::DeviceAdapter;
use crate::error::{AppResult, EmitterError};

/// Adapter for RS-232/USB-serial devices speaking a line protocol.
pub struct SerialLineAdapter {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
    port_name: String,
    /// Baud rate (e.g. 9600, 115200)
    baud_rate: u32,
    /// Overall response timeout
    timeout: Duration,
    /// Line terminator appended to outgoing commands
    line_terminator: String,
    /// Response line ending character
    response_delimiter: u8,
    /// The open port, behind Arc<Mutex> so blocking tasks can own a handle
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialLineAdapter {
    /// Create a disconnected adapter for the given port.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r\n".to_string(),
            response_delimiter: b'\n',
            port: None,
        }
    }

    /// Set the overall response timeout.
    ///
    /// Default: 1 second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the line terminator appended to outgoing commands.
    ///
    /// Default: "\r\n" (CRLF).
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the response line ending character.
    ///
    /// Default: '\n' (newline).
    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Write one framed command and read one delimited response line on the
    /// blocking executor.
    async fn exchange(&self, frame: String) -> AppResult<String> {
        let port = self
            .port
            .as_ref()
            .ok_or(EmitterError::DeviceNotConnected)?
            .clone();
        let delimiter = self.response_delimiter;
        let overall_timeout = self.timeout;

        let response = tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut guard = port.blocking_lock();
            guard
                .write_all(frame.as_bytes())
                .map_err(EmitterError::Io)?;
            guard.flush().map_err(EmitterError::Io)?;

            // Read byte-wise until the delimiter; the port's own timeout is
            // shorter than the overall deadline, so timed-out reads retry.
            let mut response = Vec::new();
            let mut byte = [0u8; 1];
            let start = Instant::now();
            loop {
                if start.elapsed() > overall_timeout {
                    return Err(EmitterError::Transport(format!(
                        "serial read timed out after {overall_timeout:?}"
                    )));
                }
                match guard.read(&mut byte) {
                    Ok(1) => {
                        if byte[0] == delimiter {
                            break;
                        }
                        response.push(byte[0]);
                    }
                    Ok(0) => {
                        return Err(EmitterError::Transport(
                            "unexpected EOF from serial port".to_string(),
                        ));
                    }
                    Ok(_) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(err) => return Err(EmitterError::Io(err)),
                }
            }
            Ok(String::from_utf8_lossy(&response).trim().to_string())
        })
        .await
        .map_err(|_| EmitterError::Transport("serial I/O task panicked".to_string()))??;

        Ok(response)
    }
}

#[async_trait]
impl DeviceAdapter for SerialLineAdapter {
    fn protocol(&self) -> &'static str {
        "serial"
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn connect(&mut self) -> AppResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            // Internal read timeout, kept short so the overall deadline governs
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|err| {
                EmitterError::Transport(format!(
                    "failed to open serial port '{}' at {} baud: {err}",
                    self.port_name, self.baud_rate
                ))
            })?;
        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
    }

    async fn send_command(&mut self, command: &str, params: &Value) -> AppResult<Value> {
        if self.port.is_none() {
            return Err(EmitterError::DeviceNotConnected);
        }
        let frame = format!("{}:{}{}", command, params, self.line_terminator);
        let response = self.exchange(frame).await?;
        debug!(command, response = %response, "serial command round trip");
        serde_json::from_str(&response)
            .map_err(|err| EmitterError::Protocol(format!("invalid response line: {err}")))
    }

    async fn read_status(&mut self) -> AppResult<Value> {
        self.send_command("STATUS", &json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_defaults() {
        let adapter = SerialLineAdapter::new("/dev/ttyUSB0", 9600);
        assert_eq!(adapter.protocol(), "serial");
        assert!(!adapter.is_connected());
        assert_eq!(adapter.timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_without_connect_is_rejected() {
        let mut adapter = SerialLineAdapter::new("/dev/ttyUSB0", 9600)
            .with_line_terminator("\r")
            .with_response_delimiter(b'\r');
        let result = adapter.send_command("SET", &json!({"power": 1})).await;
        assert!(matches!(result, Err(EmitterError::DeviceNotConnected)));
    }
}
