//! Control server on a Unix socket
//!
//! Accepts newline-delimited JSON requests and answers each with one JSON
//! line. Connections are served concurrently; the accept loop stops when
//! the shutdown signal fires.

use crate::control::{ApiError, ApiRequest, ApiResponse, CommandHandler};
use crate::error::{ProvisionError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/run/wg-provisioner/control.sock";

/// Control server manages the control API socket
pub struct ControlServer {
    socket_path: PathBuf,
    handler: Arc<CommandHandler>,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(socket_path: PathBuf, handler: Arc<CommandHandler>) -> Self {
        Self {
            socket_path,
            handler,
        }
    }

    /// Socket the server listens on
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one, with owner-only access
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            info!("Removing existing socket at {:?}", self.socket_path);
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            ProvisionError::Config(format!(
                "Failed to bind control socket {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;

        info!("Control server listening at {:?}", self.socket_path);
        Ok(listener)
    }

    /// Accept connections until `shutdown` flips to true, then remove the socket
    pub async fn serve(&self, listener: UnixListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                error!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Shutting down control server");
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Socket already gone: {}", e);
        }
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, handler: Arc<CommandHandler>) -> Result<()> {
    debug!("New client connection");

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request_str = line.trim();
        if request_str.is_empty() {
            continue;
        }
        debug!("Received request: {}", request_str);

        let response = match ApiRequest::from_json(request_str) {
            Ok(request) => handler.handle_request(request).await,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                ApiResponse::error(
                    "unknown".to_string(),
                    ApiError::parse(format!("Invalid JSON: {}", e)),
                )
            }
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;
        writer.flush().await?;
    }

    debug!("Client disconnected");
    Ok(())
}

/// Send one request to a running server and wait for the answer
pub async fn send_request(socket_path: &Path, request: &ApiRequest) -> Result<ApiResponse> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        ProvisionError::NotFound(format!(
            "control socket {} unavailable: {}",
            socket_path.display(),
            e
        ))
    })?;
    let (reader, mut writer) = stream.into_split();

    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    let line = lines.next_line().await?.ok_or_else(|| {
        ProvisionError::Serialization("connection closed before a response".to_string())
    })?;
    Ok(serde_json::from_str(&line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::control::ControlAction;
    use crate::directory::StaticDirectory;
    use crate::provisioner::Provisioner;
    use crate::system::Capabilities;
    use std::time::Duration;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> ControlServer {
        let mut config = Config::default();
        config.wireguard.state_dir = dir.path().join("state");
        let provisioner =
            Provisioner::new(&config, Arc::new(StaticDirectory::new()), Capabilities::memory())
                .unwrap();
        ControlServer::new(
            dir.path().join("control.sock"),
            Arc::new(CommandHandler::new(Arc::new(provisioner))),
        )
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        std::fs::write(server.socket_path(), "").unwrap();

        let _listener = server.bind().unwrap();
        let mode = std::fs::metadata(server.socket_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_round_trip_and_shutdown_removes_socket() {
        let dir = TempDir::new().unwrap();
        let server = Arc::new(server(&dir));
        let listener = server.bind().unwrap();
        let (tx, rx) = watch::channel(false);

        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener, rx).await })
        };

        let response = send_request(
            server.socket_path(),
            &ApiRequest::new("r1", ControlAction::Resources),
        )
        .await
        .unwrap();
        assert_eq!(response.id, "r1");
        assert!(response.success);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .unwrap()
            .unwrap();
        assert!(!server.socket_path().exists());
    }
}
