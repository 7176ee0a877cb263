//! Service manager integration
//!
//! Readiness and stopping notifications over `NOTIFY_SOCKET` when running
//! under systemd. Outside systemd every call is a no-op.

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Sends `sd_notify` style state updates
#[derive(Debug, Clone, Default)]
pub struct ServiceNotifier {
    notify_socket: Option<PathBuf>,
}

impl ServiceNotifier {
    /// Notifier for the socket named by `NOTIFY_SOCKET`, if any
    pub fn from_env() -> Self {
        let notify_socket = std::env::var_os("NOTIFY_SOCKET").map(PathBuf::from);
        if notify_socket.is_some() {
            debug!("Systemd NOTIFY_SOCKET detected");
        }
        Self { notify_socket }
    }

    /// Notifier for an explicit socket
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            notify_socket: Some(path.into()),
        }
    }

    /// Whether a service manager is listening
    pub fn is_enabled(&self) -> bool {
        self.notify_socket.is_some()
    }

    /// Startup finished
    pub fn ready(&self) {
        self.notify("READY=1");
    }

    /// Shutdown started
    pub fn stopping(&self) {
        self.notify("STOPPING=1");
    }

    /// Free-form status line
    pub fn status(&self, status: &str) {
        self.notify(&format!("STATUS={}", status));
    }

    fn notify(&self, state: &str) {
        let Some(socket_path) = &self.notify_socket else {
            return;
        };
        debug!("Sending systemd notification: {}", state);

        // Abstract namespace sockets are not supported.
        match UnixDatagram::unbound() {
            Ok(socket) => {
                if let Err(e) = socket.send_to(state.as_bytes(), socket_path) {
                    warn!("Failed to send systemd notification: {}", e);
                }
            }
            Err(e) => warn!("Failed to create Unix datagram socket: {}", e),
        }
    }
}
