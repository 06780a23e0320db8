//! OpenSSH transport.
//!
//! Drives the system `ssh` client. [`SshTransport::connect`] starts one
//! backgrounded master connection; every later command and file transfer
//! is multiplexed over its control socket, so the master is the session.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use hpcrag_core::defaults;
use hpcrag_core::{Error, ExecOutput, RemoteTransport, Result};

use crate::scheduler::{mkdir_command, remove_command};
use crate::shell::quote;

/// Exit status `ssh` itself uses for connection and authentication errors.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Exit status of the download command when the remote file does not exist.
const REMOTE_FILE_MISSING: i32 = 3;

/// Connection settings for the cluster login node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Directory for the multiplexing control socket. Defaults to the
    /// system temp dir.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_control_persist")]
    pub control_persist_secs: u64,
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
}

fn default_port() -> u16 {
    defaults::SSH_PORT
}

fn default_connect_timeout() -> u64 {
    defaults::SSH_CONNECT_TIMEOUT_SECS
}

fn default_command_timeout() -> u64 {
    defaults::REMOTE_CMD_TIMEOUT_SECS
}

fn default_control_persist() -> u64 {
    defaults::SSH_CONTROL_PERSIST_SECS
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            port: default_port(),
            identity_file: None,
            control_dir: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            control_persist_secs: default_control_persist(),
            ssh_program: default_ssh_program(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_control_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_dir = Some(path.into());
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("ssh host must not be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Config("ssh username must not be empty".to_string()));
        }
        if self.command_timeout_secs == 0 {
            return Err(Error::Config(
                "ssh command_timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    fn control_path(&self) -> PathBuf {
        let dir = self
            .control_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        dir.join("hpcrag-%r@%h:%p")
    }

    /// Options shared by every invocation, in `ssh` argument order.
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }
}

/// [`RemoteTransport`] backed by the OpenSSH client binary.
pub struct SshTransport {
    config: SshConfig,
    connected: AtomicBool,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Command multiplexed over the master connection.
    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.config.ssh_program);
        cmd.args(self.config.base_args())
            .arg("-o")
            .arg("ControlMaster=no")
            .arg(self.config.destination())
            .arg(remote_command)
            .kill_on_drop(true);
        cmd
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    /// Map an `ssh` exit to the transport contract.
    fn check_connection(&self, output: &ExecOutput) -> Result<()> {
        if output.exit_status == SSH_CONNECTION_FAILURE {
            self.connected.store(false, Ordering::SeqCst);
            return Err(Error::Connection(format!(
                "ssh to {} failed: {}",
                self.config.host,
                output.stderr_trimmed()
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        mut cmd: Command,
        stdin: Option<Vec<u8>>,
        op: &str,
    ) -> Result<(ExecOutput, Vec<u8>)> {
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let run = async {
            let mut child = cmd
                .spawn()
                .map_err(|e| Error::Connection(format!("Failed to execute ssh: {}", e)))?;
            if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(&data).await?;
                pipe.shutdown().await?;
            }
            let output = child.wait_with_output().await?;
            Ok::<_, Error>(output)
        };

        let output = tokio::time::timeout(self.timeout(), run)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{} on {} timed out after {}s",
                    op, self.config.host, self.config.command_timeout_secs
                ))
            })??;

        let exec = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        };
        self.check_connection(&exec)?;
        Ok((exec, output.stdout))
    }

    /// Stop the master connection. Best-effort.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let status = Command::new(&self.config.ssh_program)
            .args(self.config.base_args())
            .arg("-O")
            .arg("exit")
            .arg(self.config.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            warn!(host = %self.config.host, error = %e, "Failed to stop ssh master");
        }
    }
}

#[async_trait]
impl RemoteTransport for SshTransport {
    #[instrument(
        skip(self),
        fields(subsystem = "remote", component = "ssh", op = "connect", host = %self.config.host)
    )]
    async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let start = Instant::now();

        // The backgrounded master keeps whatever stdio it inherits, so it
        // must not hold our pipes.
        let status = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs + 5),
            Command::new(&self.config.ssh_program)
                .args(self.config.base_args())
                .arg("-o")
                .arg("ControlMaster=yes")
                .arg("-o")
                .arg(format!("ControlPersist={}", self.config.control_persist_secs))
                .arg("-f")
                .arg("-N")
                .arg(self.config.destination())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| Error::Connection(format!("connecting to {} timed out", self.config.host)))?
        .map_err(|e| Error::Connection(format!("Failed to execute ssh: {}", e)))?;

        if !status.success() {
            return Err(Error::Connection(format!(
                "ssh master connection to {} failed ({})",
                self.config.destination(),
                status
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "SSH master connection established"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "remote", component = "ssh", op = "exec"))]
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let (output, _) = self.run(self.command(command), None, "exec").await?;
        debug!(exit_status = output.exit_status, "Remote command finished");
        Ok(output)
    }

    #[instrument(skip(self), fields(subsystem = "remote", component = "ssh", op = "upload"))]
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let data = tokio::fs::read(local_path).await?;
        let bytes = data.len();
        let cmd = self.command(&format!("cat > {}", quote(remote_path)));
        let (output, _) = self.run(cmd, Some(data), "upload").await?;
        if output.exit_status != 0 {
            return Err(Error::Remote(format!(
                "upload to {} failed: {}",
                remote_path,
                output.stderr_trimmed()
            )));
        }
        debug!(bytes, "Uploaded file");
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "remote", component = "ssh", op = "download"))]
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let cmd = self.command(&download_command(remote_path));
        let (output, raw) = self.run(cmd, None, "download").await?;
        if output.exit_status != 0 {
            if output.exit_status == REMOTE_FILE_MISSING {
                return Err(Error::NotFound(remote_path.to_string()));
            }
            return Err(Error::Remote(format!(
                "download of {} failed: {}",
                remote_path,
                output.stderr_trimmed()
            )));
        }
        tokio::fs::write(local_path, &raw).await?;
        debug!(bytes = raw.len(), "Downloaded file");
        Ok(())
    }

    async fn remove(&self, remote_path: &str) -> Result<()> {
        let output = self.exec(&remove_command(remote_path)).await?;
        if output.exit_status != 0 {
            return Err(Error::Remote(format!(
                "rm {} failed: {}",
                remote_path,
                output.stderr_trimmed()
            )));
        }
        Ok(())
    }

    async fn ensure_dir(&self, remote_path: &str) -> Result<()> {
        let output = self.exec(&mkdir_command(remote_path)).await?;
        if output.exit_status != 0 {
            return Err(Error::Remote(format!(
                "mkdir {} failed: {}",
                remote_path,
                output.stderr_trimmed()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// `cat` a remote file, exiting with [`REMOTE_FILE_MISSING`] when it is
/// absent. The exit status does not depend on the remote locale.
fn download_command(remote_path: &str) -> String {
    let path = quote(remote_path);
    format!("test -f {} || exit {}; cat -- {}", path, REMOTE_FILE_MISSING, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_toml() {
        let config: SshConfig = toml::from_str(
            r#"
            host = "puhti.csc.fi"
            username = "aino"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.command_timeout_secs, 120);
        assert_eq!(config.ssh_program, "ssh");
        assert!(config.identity_file.is_none());
        assert_eq!(config.destination(), "aino@puhti.csc.fi");
    }

    #[test]
    fn test_base_args() {
        let config = SshConfig::new("login.example", "u")
            .with_port(2222)
            .with_identity_file("/home/u/.ssh/id_ed25519")
            .with_control_dir("/run/hpcrag");
        let args = config.base_args();
        assert_eq!(&args[..2], &["-p".to_string(), "2222".to_string()]);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ControlPath=/run/hpcrag/hpcrag-%r@%h:%p".to_string()));
        assert_eq!(
            &args[args.len() - 2..],
            &["-i".to_string(), "/home/u/.ssh/id_ed25519".to_string()]
        );
    }

    #[test]
    fn test_validate() {
        assert!(SshConfig::new("h", "u").validate().is_ok());
        assert!(SshConfig::new("", "u").validate().is_err());
        assert!(SshConfig::new("h", " ").validate().is_err());
        assert!(SshConfig::new("h", "u")
            .with_command_timeout(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_exit_255_is_connection_error() {
        let transport = SshTransport::new(SshConfig::new("h", "u"));
        transport.connected.store(true, Ordering::SeqCst);
        let err = transport
            .check_connection(&ExecOutput::failure("Connection refused", 255))
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(!transport.connected.load(Ordering::SeqCst));
        assert!(transport
            .check_connection(&ExecOutput::failure("squeue: error", 1))
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_ssh_binary_is_connection_error() {
        let mut config = SshConfig::new("h", "u");
        config.ssh_program = "/nonexistent/ssh-binary".to_string();
        let transport = SshTransport::new(config);
        let err = transport.exec("true").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    /// Transport whose `ssh` runs the remote command on the local host.
    fn local_transport(dir: &Path) -> SshTransport {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("fake-ssh");
        std::fs::write(
            &program,
            "#!/bin/sh\nfor last; do :; done\nLC_ALL=fi_FI.UTF-8 exec sh -c \"$last\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = SshConfig::new("h", "u");
        config.ssh_program = program.display().to_string();
        SshTransport::new(config)
    }

    #[test]
    fn test_download_command() {
        assert_eq!(
            download_command("/w/Aino 60v.json"),
            "test -f '/w/Aino 60v.json' || exit 3; cat -- '/w/Aino 60v.json'"
        );
    }

    #[tokio::test]
    async fn test_download_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let transport = local_transport(dir.path());
        let missing = dir.path().join("x.json");

        let err = transport
            .download(&missing.display().to_string(), &dir.path().join("out.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_download_copies_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = local_transport(dir.path());
        let remote = dir.path().join("embeddings.json");
        std::fs::write(&remote, br#"{"embeddings": [[0.1, 0.2]]}"#).unwrap();
        let local = dir.path().join("out.json");

        transport
            .download(&remote.display().to_string(), &local)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(&local).unwrap(),
            br#"{"embeddings": [[0.1, 0.2]]}"#
        );
    }

    #[test]
    fn test_transport_name() {
        assert_eq!(SshTransport::new(SshConfig::new("h", "u")).name(), "ssh");
    }
}
