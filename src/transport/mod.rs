//! Peer transport over a remote shell
//!
//! Every exchange with a peer is one request/response call: run the remote
//! clipslot's `copy` or `paste` sub-command over ssh and pipe clipboard
//! bytes through stdin/stdout. No connection outlives a call.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{ConfigError, PeerConfig};

/// Peer transport errors with user-friendly messages
#[derive(Debug, Error)]
pub enum PeerError {
    /// Remote call failed for any reason: spawn, non-zero exit or timeout
    #[error("Peer '{peer}' ({target}) is unreachable: {reason}. Check that ssh works non-interactively and clipslot is installed there.")]
    Unreachable {
        peer: String,
        target: String,
        reason: String,
    },
}

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Blocking call-and-capture remote shell primitive
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` on `target`, optionally feeding `stdin`.
    ///
    /// Returns `Err` only when the call could not be made at all. A remote
    /// command that ran and failed is an `Ok` with a non-zero status.
    async fn exec(
        &self,
        target: &str,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ShellOutput, String>;
}

/// Remote shell backed by the system `ssh` binary
#[derive(Debug, Clone)]
pub struct SshShell {
    program: String,
    extra_args: Vec<String>,
}

impl Default for SshShell {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl SshShell {
    pub fn new(extra_args: Vec<String>) -> Self {
        Self {
            extra_args,
            ..Self::default()
        }
    }

    /// Use another binary in place of `ssh`, e.g. a wrapper script
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, target: &str, remote_command: &str) -> Command {
        let mut command = Command::new(&self.program);
        // Never prompt for passwords or host keys
        command.args(["-o", "BatchMode=yes"]);
        command.args(&self.extra_args);
        // A target starting with '-' must not be read as an option
        command.arg("--").arg(target).arg(remote_command);
        // Own process group, so a terminal Ctrl-C aimed at a watch loop
        // leaves the in-flight call to finish
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(
        &self,
        target: &str,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ShellOutput, String> {
        let mut cmd = self.command(target, command);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.program, e))?;

        let writer = match (stdin, child.stdin.take()) {
            (Some(data), Some(mut pipe)) => {
                let data = data.to_vec();
                Some(tokio::spawn(async move {
                    pipe.write_all(&data).await?;
                    pipe.shutdown().await
                }))
            }
            _ => None,
        };

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("timed out after {}s", timeout.as_secs()))?
            .map_err(|e| e.to_string())?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if output.status.success() => {
                    return Err(format!("failed to send data: {}", e));
                }
                _ => {}
            }
        }

        Ok(ShellOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code(),
        })
    }
}

/// A configured remote machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    /// ssh destination
    pub target: String,
    /// How clipslot is invoked on the remote side
    pub remote_cmd: String,
    pub timeout: Duration,
}

impl Peer {
    pub fn from_config(name: &str, config: &PeerConfig) -> Self {
        Self {
            name: name.to_string(),
            target: config.ssh.clone(),
            remote_cmd: config.remote_cmd.clone(),
            timeout: config.timeout(),
        }
    }

    /// Look up `name` in the `[peers]` table
    pub fn lookup(config: &crate::config::Config, name: &str) -> Result<Self, ConfigError> {
        Ok(Self::from_config(name, config.peer(name)?))
    }

    fn remote_command(&self, sub_command: &str) -> String {
        format!("{} {}", self.remote_cmd, sub_command)
    }

    fn unreachable(&self, reason: impl Into<String>) -> PeerError {
        PeerError::Unreachable {
            peer: self.name.clone(),
            target: self.target.clone(),
            reason: reason.into(),
        }
    }
}

/// send/recv against peers through a [`RemoteShell`]
#[derive(Clone)]
pub struct PeerTransport {
    shell: Arc<dyn RemoteShell>,
}

impl PeerTransport {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Self { shell }
    }

    /// Transport over the system ssh client
    pub fn ssh(extra_args: Vec<String>) -> Self {
        Self::new(Arc::new(SshShell::new(extra_args)))
    }

    /// Put `data` on the peer's clipboard
    pub async fn send_to(&self, peer: &Peer, data: &[u8]) -> Result<(), PeerError> {
        let command = peer.remote_command("copy");
        debug!(peer = %peer.name, target = %peer.target, size = data.len(), "sending to peer");

        let output = self
            .shell
            .exec(&peer.target, &command, Some(data), peer.timeout)
            .await
            .map_err(|reason| peer.unreachable(reason))?;
        check_status(peer, &output)?;

        info!(peer = %peer.name, size = data.len(), "sent clipboard to peer");
        Ok(())
    }

    /// Read the peer's clipboard
    pub async fn read_from(&self, peer: &Peer) -> Result<Vec<u8>, PeerError> {
        let command = peer.remote_command("paste");
        debug!(peer = %peer.name, target = %peer.target, "reading from peer");

        let output = self
            .shell
            .exec(&peer.target, &command, None, peer.timeout)
            .await
            .map_err(|reason| peer.unreachable(reason))?;
        check_status(peer, &output)?;

        debug!(peer = %peer.name, size = output.stdout.len(), "read clipboard from peer");
        Ok(output.stdout)
    }
}

fn check_status(peer: &Peer, output: &ShellOutput) -> Result<(), PeerError> {
    if output.success() {
        return Ok(());
    }

    let status = match output.status {
        Some(code) => format!("remote command exited with status {}", code),
        None => "remote command was killed".to_string(),
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();

    Err(peer.unreachable(if stderr.is_empty() {
        status
    } else {
        format!("{}: {}", status, stderr)
    }))
}
