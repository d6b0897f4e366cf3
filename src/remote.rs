//! Remote command channel
//!
//! Cloud builds drive a remote host over a small command surface: run a
//! shell command, upload a file, test a path. The default implementation
//! shells out to the system ssh/scp binaries in batch mode.

use crate::cluster::SshConfig;
use crate::error::{StrataError, StrataResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Commands the cloud pipeline issues against the build host
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run a shell command remotely, returning its stdout
    async fn run(&self, command: &str) -> StrataResult<String>;

    /// Upload a local file to a remote path
    async fn upload(&self, local: &Path, remote: &str) -> StrataResult<()>;

    /// Whether a remote path exists
    async fn exists(&self, path: &str) -> StrataResult<bool>;
}

/// ssh/scp-backed channel to one host
pub struct SshChannel {
    host: String,
    ssh: SshConfig,
}

impl SshChannel {
    pub fn new(host: impl Into<String>, ssh: SshConfig) -> Self {
        Self {
            host: host.into(),
            ssh,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.ssh.user, self.host)
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(ref identity) = self.ssh.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    async fn capture(&self, mut command: Command, label: &str) -> StrataResult<String> {
        let output = command
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StrataError::command_failed(label.to_string(), e))?;

        if !output.status.success() {
            return Err(StrataError::RemoteCommand {
                host: self.host.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn run(&self, command: &str) -> StrataResult<String> {
        debug!("ssh {}: {command}", self.destination());
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args())
            .arg("-p")
            .arg(self.ssh.port.to_string())
            .arg(self.destination())
            .arg(command);
        self.capture(cmd, "ssh").await
    }

    async fn upload(&self, local: &Path, remote: &str) -> StrataResult<()> {
        debug!("scp {} -> {}:{remote}", local.display(), self.destination());
        let mut cmd = Command::new("scp");
        cmd.args(self.common_args())
            .arg("-P")
            .arg(self.ssh.port.to_string())
            .arg(local)
            .arg(format!("{}:{remote}", self.destination()));
        self.capture(cmd, "scp").await.map(|_| ())
    }

    async fn exists(&self, path: &str) -> StrataResult<bool> {
        match self.run(&format!("test -e {path}")).await {
            Ok(_) => Ok(true),
            Err(StrataError::RemoteCommand { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
