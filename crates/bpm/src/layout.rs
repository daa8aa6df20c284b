//! On-disk prerequisites for running a job: log and pidfile directories,
//! and the append-only log files handed to the container runtime.

use std::fs::{DirBuilder, File, OpenOptions};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use bpm_common::{BoshPaths, BpmError, BpmResult};
use nix::unistd::{Gid, Uid};
use tracing::debug;

use crate::config::JobConfig;
use crate::users::BpmUser;

/// Filesystem artifacts prepared before a container can be run.
#[derive(Debug)]
pub struct JobPrereqs {
    /// Directory holding the process pidfile.
    pub pid_dir: PathBuf,
    /// Stdout log, opened for appending.
    pub stdout: File,
    /// Stderr log, opened for appending.
    pub stderr: File,
}

/// Prepares the per-job filesystem layout.
pub trait LayoutManager: Send + Sync {
    /// Create the job's log and pidfile directories and open its log files.
    ///
    /// Idempotent with respect to pre-existing directories and files:
    /// restarting a job must never erase prior log content.
    ///
    /// # Errors
    ///
    /// Any directory-creation, ownership, or open failure is surfaced with
    /// the path it occurred on.
    fn create_job_prerequisites(
        &self,
        paths: &BoshPaths,
        job: &str,
        config: &JobConfig,
        user: &BpmUser,
    ) -> BpmResult<JobPrereqs>;
}

/// [`LayoutManager`] operating on the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLayout;

impl LayoutManager for HostLayout {
    fn create_job_prerequisites(
        &self,
        paths: &BoshPaths,
        job: &str,
        config: &JobConfig,
        user: &BpmUser,
    ) -> BpmResult<JobPrereqs> {
        let log_dir = paths.log_dir(job);
        debug!(path = %log_dir.display(), "creating job log directory");
        make_dir(&log_dir, 0o750)?;
        chown(&log_dir, user)?;

        let pid_dir = paths.pid_dir(job);
        debug!(path = %pid_dir.display(), "creating job pidfile directory");
        make_dir(&pid_dir, 0o700)?;

        let stdout = open_log(&paths.stdout_log(job, &config.name), user)?;
        let stderr = open_log(&paths.stderr_log(job, &config.name), user)?;

        Ok(JobPrereqs {
            pid_dir,
            stdout,
            stderr,
        })
    }
}

fn make_dir(path: &Path, mode: u32) -> BpmResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|source| BpmError::filesystem("create directory", path, source))
}

fn open_log(path: &Path, user: &BpmUser) -> BpmResult<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o640)
        .open(path)
        .map_err(|source| BpmError::filesystem("open log file", path, source))?;
    chown(path, user)?;
    Ok(file)
}

fn chown(path: &Path, user: &BpmUser) -> BpmResult<()> {
    nix::unistd::chown(
        path,
        Some(Uid::from_raw(user.uid)),
        Some(Gid::from_raw(user.gid)),
    )
    .map_err(|errno| BpmError::filesystem("change ownership of", path, errno.into()))
}
