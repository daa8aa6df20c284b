//! Client for the external container runtime binary.
//!
//! BPM does not implement containers itself; it shells out to a
//! `runc`-compatible binary. The runtime runs as a separate process with
//! its own crash domain, which keeps the isolation boundary between BPM
//! and the kernel-facing machinery.

use std::fs::{DirBuilder, File};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bpm_common::{BpmError, ContainerId};
use bpm_oci::{ContainerState, Spec};
use nix::unistd::{Gid, Uid};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::users::BpmUser;

/// Errors from driving the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime binary could not be spawned at all.
    #[error("failed to run {}: {source}", binary.display())]
    Spawn {
        /// The binary that failed to spawn.
        binary: PathBuf,
        /// The underlying failure.
        source: std::io::Error,
    },

    /// The runtime binary exited non-zero.
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        /// The command line that failed.
        command: String,
        /// Its exit status.
        status: std::process::ExitStatus,
        /// Captured stderr, when it was not redirected to the job logs.
        stderr: String,
    },

    /// The runtime's state output could not be decoded.
    #[error("malformed state for container '{id}': {source}")]
    MalformedState {
        /// The container whose state was queried.
        id: String,
        /// The JSON decoding failure.
        source: serde_json::Error,
    },

    /// The runtime spec could not be serialized into the bundle.
    #[error("failed to encode runtime spec: {0}")]
    EncodeSpec(#[from] serde_json::Error),

    /// A bundle filesystem operation failed.
    #[error(transparent)]
    Bundle(#[from] BpmError),
}

/// Operations BPM needs from a container runtime.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create the bundle directory, its rootfs, and write `config.json`.
    async fn create_bundle(
        &self,
        bundle_dir: &Path,
        spec: &Spec,
        user: &BpmUser,
    ) -> Result<(), RuntimeError>;

    /// Run a container detached, wiring its output to the given log files.
    ///
    /// Returns after the runtime has forked the init process and written
    /// the pidfile.
    async fn run_container(
        &self,
        pid_file: &Path,
        bundle_dir: &Path,
        id: &ContainerId,
        stdout: File,
        stderr: File,
    ) -> Result<(), RuntimeError>;

    /// Query the runtime for the container's state.
    async fn container_state(&self, id: &ContainerId) -> Result<ContainerState, RuntimeError>;

    /// Send SIGTERM to the container's init process.
    async fn stop_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Remove the runtime's bookkeeping for a container.
    async fn delete_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Recursively remove the bundle directory.
    async fn destroy_bundle(&self, bundle_dir: &Path) -> Result<(), RuntimeError>;
}

/// [`RuntimeClient`] that shells out to a `runc`-compatible binary.
#[derive(Debug, Clone)]
pub struct RuncClient {
    runc_path: PathBuf,
}

impl RuncClient {
    /// Create a client driving the given runtime binary.
    #[must_use]
    pub fn new(runc_path: impl Into<PathBuf>) -> Self {
        Self {
            runc_path: runc_path.into(),
        }
    }

    /// Run the binary with the given arguments, capturing its output.
    async fn output(&self, args: &[&str]) -> Result<std::process::Output, RuntimeError> {
        debug!(binary = %self.runc_path.display(), ?args, "invoking container runtime");
        Command::new(&self.runc_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                binary: self.runc_path.clone(),
                source,
            })
    }

    /// Like [`Self::output`], but treat a non-zero exit as an error
    /// carrying the runtime's stderr.
    async fn run_checked(&self, args: &[&str]) -> Result<Vec<u8>, RuntimeError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.command_line(args),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn command_line(&self, args: &[&str]) -> String {
        let mut line = self.runc_path.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[async_trait]
impl RuntimeClient for RuncClient {
    async fn create_bundle(
        &self,
        bundle_dir: &Path,
        spec: &Spec,
        user: &BpmUser,
    ) -> Result<(), RuntimeError> {
        debug!(bundle = %bundle_dir.display(), "creating bundle");

        let rootfs = bundle_dir.join("rootfs");
        for dir in [bundle_dir, rootfs.as_path()] {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)
                .map_err(|source| BpmError::filesystem("create bundle directory", dir, source))?;
            nix::unistd::chown(dir, Some(Uid::from_raw(user.uid)), Some(Gid::from_raw(user.gid)))
                .map_err(|errno| {
                    BpmError::filesystem("change ownership of", dir, errno.into())
                })?;
        }

        let config_path = bundle_dir.join("config.json");
        let config_json = serde_json::to_vec_pretty(spec)?;
        std::fs::write(&config_path, config_json)
            .map_err(|source| BpmError::filesystem("write", &config_path, source))?;

        Ok(())
    }

    async fn run_container(
        &self,
        pid_file: &Path,
        bundle_dir: &Path,
        id: &ContainerId,
        stdout: File,
        stderr: File,
    ) -> Result<(), RuntimeError> {
        debug!(container_id = %id, bundle = %bundle_dir.display(), "running container");

        let status = Command::new(&self.runc_path)
            .arg("run")
            .arg("--detach")
            .arg("--pid-file")
            .arg(pid_file)
            .arg("--bundle")
            .arg(bundle_dir)
            .arg(id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .map_err(|source| RuntimeError::Spawn {
                binary: self.runc_path.clone(),
                source,
            })?;

        if !status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.command_line(&["run", id.as_str()]),
                status,
                stderr: "output redirected to the job logs".to_string(),
            });
        }
        Ok(())
    }

    async fn container_state(&self, id: &ContainerId) -> Result<ContainerState, RuntimeError> {
        let stdout = self.run_checked(&["state", id.as_str()]).await?;
        serde_json::from_slice(&stdout).map_err(|source| RuntimeError::MalformedState {
            id: id.to_string(),
            source,
        })
    }

    async fn stop_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.run_checked(&["kill", id.as_str(), "TERM"]).await?;
        Ok(())
    }

    async fn delete_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.run_checked(&["delete", "--force", id.as_str()]).await?;
        Ok(())
    }

    async fn destroy_bundle(&self, bundle_dir: &Path) -> Result<(), RuntimeError> {
        debug!(bundle = %bundle_dir.display(), "destroying bundle");
        match tokio::fs::remove_dir_all(bundle_dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BpmError::filesystem("remove", bundle_dir, source).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpm_oci::{Root, Spec};

    fn test_user() -> BpmUser {
        BpmUser {
            name: "test".to_string(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    fn container_id() -> ContainerId {
        ContainerId::for_process("nats", "server").unwrap()
    }

    #[tokio::test]
    async fn create_bundle_writes_spec() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_dir = dir.path().join("bundle");
        let client = RuncClient::new("runc");

        let spec = Spec {
            root: Some(Root {
                path: "rootfs".into(),
                readonly: true,
            }),
            ..Default::default()
        };

        client
            .create_bundle(&bundle_dir, &spec, &test_user())
            .await
            .unwrap();

        assert!(bundle_dir.join("rootfs").is_dir());
        let written = std::fs::read(bundle_dir.join("config.json")).unwrap();
        let parsed: Spec = serde_json::from_slice(&written).unwrap();
        assert!(parsed.root.unwrap().readonly);
    }

    #[tokio::test]
    async fn destroy_bundle_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bundle_dir = dir.path().join("bundle");
        std::fs::create_dir_all(bundle_dir.join("rootfs")).unwrap();

        let client = RuncClient::new("runc");
        client.destroy_bundle(&bundle_dir).await.unwrap();
        assert!(!bundle_dir.exists());

        // Destroying an absent bundle is not an error.
        client.destroy_bundle(&bundle_dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_failure() {
        let client = RuncClient::new("/nonexistent/runc");
        let err = client.stop_container(&container_id()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        // `false` stands in for a runtime rejecting the operation.
        let client = RuncClient::new("false");
        let err = client.stop_container(&container_id()).await.unwrap_err();
        match err {
            RuntimeError::CommandFailed { command, .. } => {
                assert!(command.contains("kill nats-server TERM"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unparseable_state_is_reported() {
        // `echo` stands in for a runtime emitting garbage state output.
        let client = RuncClient::new("echo");
        let err = client.container_state(&container_id()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::MalformedState { .. }));
    }
}
