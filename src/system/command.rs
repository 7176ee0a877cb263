//! Bounded external command execution

use crate::error::{ProvisionError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Host facility a command belongs to; selects the error it fails with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    /// `ip` / `wg` link and peer control
    Interface,
    /// `iptables`
    Firewall,
    /// `wg genkey` / `wg pubkey`
    Keys,
}

impl Facility {
    fn error(self, message: String) -> ProvisionError {
        match self {
            Facility::Interface => ProvisionError::InterfaceCommandFailed(message),
            Facility::Firewall => ProvisionError::FirewallCommandFailed(message),
            Facility::Keys => ProvisionError::KeyGenerationFailed(message),
        }
    }
}

/// Runs external commands under a deadline.
///
/// A command that outlives the deadline is killed and yields `Timeout`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    /// Create a runner with the given per-command deadline
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-command deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program args`, optionally feeding `input` on stdin, and return stdout
    pub async fn run(
        &self,
        facility: Facility,
        program: &str,
        args: &[&str],
        input: Option<&str>,
    ) -> Result<String> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!("Executing command: {}", command_line);

        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| facility.error(format!("Failed to execute {}: {}", command_line, e)))?;

        if let Some(input) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| facility.error(format!("Failed to write stdin of {}: {}", program, e)))?;
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ProvisionError::Timeout(format!(
                    "{} did not finish within {}s",
                    command_line,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| facility.error(format!("Failed to wait for {}: {}", command_line, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(facility.error(format!(
                "Command failed: {}: {}",
                command_line,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
