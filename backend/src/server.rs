//! Unix socket server for Bundleyard API
//!
//! This module provides a JSON-over-Unix-socket server using length-prefixed framing.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_util::codec::{Decoder, Encoder, Framed};
use futures::{SinkExt, StreamExt};
use bytes::Buf;
use tracing::{info, warn, error, debug, instrument};

use crate::api::Request;
use crate::handler::handle_request;
use crate::ProjectManager;

/// Frame limit used when none is configured
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// JSON codec for length-prefixed JSON messages
///
/// Message format: 4-byte big-endian length prefix + JSON payload
#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_frame_bytes: usize,
}

impl JsonCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for JsonCodec {
    type Item = serde_json::Value;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 4 bytes for length prefix
        if src.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[0..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame_bytes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame of {} bytes exceeds limit of {} bytes", len, self.max_frame_bytes),
            ));
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);

        let json_data = src.split_to(len);
        let value = serde_json::from_slice(&json_data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        Ok(Some(value))
    }
}

impl Encoder<serde_json::Value> for JsonCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: serde_json::Value, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        let json_bytes = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if json_bytes.len() > self.max_frame_bytes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame of {} bytes exceeds limit of {} bytes", json_bytes.len(), self.max_frame_bytes),
            ));
        }

        let len = u32::try_from(json_bytes.len())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        dst.reserve(4 + json_bytes.len());
        dst.extend_from_slice(&len.to_be_bytes());
        dst.extend_from_slice(&json_bytes);

        Ok(())
    }
}

/// Unix socket server for the Bundleyard API
pub struct SocketServer {
    socket_path: PathBuf,
    manager: Arc<ProjectManager>,
}

impl SocketServer {
    /// Create a new socket server listening on the manager's socket path
    pub fn new(manager: Arc<ProjectManager>) -> Self {
        Self {
            socket_path: manager.socket_path().clone(),
            manager,
        }
    }

    /// Run the socket server
    ///
    /// This method binds to the Unix socket and starts accepting connections.
    /// Each connection is handled in its own task.
    #[instrument(skip(self), fields(socket = %self.socket_path.display()))]
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let socket_path = &self.socket_path;

        if socket_path.exists() {
            debug!("Removing existing socket file: {}", socket_path.display());
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!("Bundleyard API server listening on {}", socket_path.display());

        // Read/write for owner only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(socket_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(socket_path, perms)?;
            debug!("Set socket permissions to 0600");
        }

        let mut connection_count: u64 = 0;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    connection_count += 1;
                    let manager = self.manager.clone();
                    let conn_id = connection_count;

                    debug!(connection_id = conn_id, peer_addr = ?addr, "New connection accepted");

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, manager, conn_id).await {
                            error!(connection_id = conn_id, error = %e, "Connection error");
                        } else {
                            debug!(connection_id = conn_id, "Connection closed gracefully");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }
}

/// Handle a single client connection
#[instrument(skip(stream, manager), fields(connection_id = connection_id))]
async fn handle_connection(
    stream: tokio::net::UnixStream,
    manager: Arc<ProjectManager>,
    connection_id: u64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut framed = Framed::new(stream, JsonCodec::new(manager.max_frame_bytes()));

    let mut request_count: u64 = 0;

    loop {
        match framed.next().await {
            Some(Ok(json_value)) => {
                request_count += 1;

                let request = match serde_json::from_value::<Request>(json_value) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!(request_id = request_count, error = %e, "Invalid request format");
                        let error_response = serde_json::json!({
                            "status": 400,
                            "error": {
                                "code": "INVALID_REQUEST",
                                "message": format!("Invalid request format: {}", e)
                            }
                        });
                        framed.send(error_response).await?;
                        continue;
                    }
                };

                info!(
                    request_id = request_count,
                    method = ?request.method,
                    endpoint = %request.endpoint,
                    "Incoming request"
                );

                let response = handle_request(request, manager.clone()).await;

                if response.is_success() {
                    debug!(
                        request_id = request_count,
                        status = response.status,
                        "Request successful"
                    );
                } else {
                    warn!(
                        request_id = request_count,
                        status = response.status,
                        error = response.error.as_ref().map(|e| e.message.as_str()),
                        "Request failed"
                    );
                }

                let response_json = match serde_json::to_value(&response) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(request_id = request_count, error = %e, "Failed to serialize response");
                        let error_json = serde_json::json!({
                            "status": 500,
                            "error": {
                                "code": "SERIALIZATION_ERROR",
                                "message": format!("Failed to serialize response: {}", e)
                            }
                        });
                        framed.send(error_json).await?;
                        continue;
                    }
                };

                framed.send(response_json).await?;
            }
            Some(Err(e)) => {
                error!(connection_id = connection_id, error = %e, "Frame decode error");
                return Err(Box::new(e));
            }
            None => {
                debug!(connection_id = connection_id, total_requests = request_count, "Connection closed by client");
                break;
            }
        }
    }

    Ok(())
}
