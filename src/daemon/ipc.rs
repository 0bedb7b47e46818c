//! Inter-process communication for daemon control
//!
//! Unix domain socket carrying one newline-terminated JSON request and one
//! JSON response per connection. Command batches, reload signals and status
//! queries all arrive this way.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::daemon::config::ReloadOutcome;
use crate::models::CommandEntry;
use crate::monitor::Watchdog;

/// Error code for a request the daemon could not parse
pub const CODE_BAD_REQUEST: u32 = 400;
/// Error code for a reload that left the previous or fallback config active
pub const CODE_RELOAD_FAILED: u32 = 500;

/// IPC message types for daemon communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// External command batch (`add_whitelist`, `set_token`, ...)
    Command {
        entries: Vec<CommandEntry>,
        /// Unique request ID for tracking
        request_id: String,
    },
    /// Re-read the kiosk config file
    ReloadConfig { request_id: String },
    GetStatus { request_id: String },
}

impl IpcMessage {
    pub fn command(entries: Vec<CommandEntry>) -> Self {
        IpcMessage::Command {
            entries,
            request_id: generate_request_id(),
        }
    }

    pub fn reload() -> Self {
        IpcMessage::ReloadConfig {
            request_id: generate_request_id(),
        }
    }

    pub fn status() -> Self {
        IpcMessage::GetStatus {
            request_id: generate_request_id(),
        }
    }
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    Success {
        request_id: String,
        data: Option<serde_json::Value>,
        message: Option<String>,
    },
    Error {
        request_id: String,
        code: u32,
        message: String,
        details: Option<String>,
    },
}

/// Generate unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file when server is dropped
        if self.listener.is_some() && self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Handler for individual IPC connections
#[derive(Clone)]
struct IpcServerHandler {
    watchdog: Arc<Watchdog>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one left by a previous run
    pub fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove existing socket: {}", self.socket_path.display())
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket: {}", self.socket_path.display()))?;
        self.listener = Some(listener);
        log::info!("IPC server listening on {}", self.socket_path.display());
        Ok(())
    }

    /// Accept connections until the listener fails, serving each on its own task
    pub async fn serve(&self, watchdog: Arc<Watchdog>) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("IPC server is not bound"))?;
        let handler = IpcServerHandler { watchdog };

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle_connection(stream).await {
                            log::warn!("Error handling IPC connection: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    return Err(e).context("Error accepting IPC connection");
                }
            }
        }
    }

    /// Stop the server and clean up socket file
    pub fn stop(&mut self) -> Result<()> {
        if self.listener.take().is_some() && self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove socket file: {}", self.socket_path.display())
            })?;
        }
        Ok(())
    }
}

impl IpcServerHandler {
    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        reader
            .read_line(&mut line)
            .await
            .context("Failed to read from client")?;

        let response = match serde_json::from_str::<IpcMessage>(line.trim()) {
            Ok(message) => self.process_message(message).await,
            Err(e) => IpcResponse::Error {
                request_id: String::new(),
                code: CODE_BAD_REQUEST,
                message: "Failed to parse IPC message".to_string(),
                details: Some(e.to_string()),
            },
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;

        Ok(())
    }

    async fn process_message(&self, message: IpcMessage) -> IpcResponse {
        match message {
            IpcMessage::Command {
                entries,
                request_id,
            } => {
                let summary = self.watchdog.apply_commands(&entries).await;
                IpcResponse::Success {
                    request_id,
                    message: Some(format!(
                        "Applied {} of {} command(s)",
                        summary.applied.len(),
                        entries.len()
                    )),
                    data: serde_json::to_value(&summary).ok(),
                }
            }
            IpcMessage::ReloadConfig { request_id } => match self.watchdog.reload_config() {
                ReloadOutcome::Replaced { errors } => IpcResponse::Success {
                    request_id,
                    data: Some(serde_json::json!({ "errors": errors })),
                    message: Some("Configuration reloaded".to_string()),
                },
                ReloadOutcome::KeptPrevious(err) => IpcResponse::Error {
                    request_id,
                    code: CODE_RELOAD_FAILED,
                    message: "Reload failed, previous configuration kept".to_string(),
                    details: Some(err.to_string()),
                },
                ReloadOutcome::Fallback(err) => IpcResponse::Error {
                    request_id,
                    code: CODE_RELOAD_FAILED,
                    message: "Reload failed, running with everything disabled".to_string(),
                    details: Some(err.to_string()),
                },
            },
            IpcMessage::GetStatus { request_id } => {
                let status = self.watchdog.status().await;
                IpcResponse::Success {
                    request_id,
                    data: serde_json::to_value(&status).ok(),
                    message: None,
                }
            }
        }
    }
}

/// Client side of the control socket
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Send one request and wait for the response
    pub async fn send(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let stream = UnixStream::connect(&self.socket_path).await.with_context(|| {
            format!(
                "Failed to connect to daemon at {} (is it running?)",
                self.socket_path.display()
            )
        })?;
        let (reader, mut writer) = stream.into_split();

        let mut request = serde_json::to_string(message).context("Failed to serialize request")?;
        request.push('\n');
        writer
            .write_all(request.as_bytes())
            .await
            .context("Failed to send request")?;

        let mut line = String::new();
        BufReader::new(reader)
            .read_line(&mut line)
            .await
            .context("Failed to read daemon response")?;

        serde_json::from_str(line.trim()).context("Failed to parse daemon response")
    }
}
