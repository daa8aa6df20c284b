//! The container lifecycle state machine.
//!
//! One [`JobLifecycle`] drives exactly one container:
//!
//! ```text
//!   Absent ──start_job──► Running
//!   Running ──stop_job (stopped observed)──► Stopped
//!   Running ──stop_job (timeout)──► Stopping   (caller may remove_job)
//!   Stopped / Stopping ──remove_job──► Absent
//! ```
//!
//! The coordinator is parameterized over its collaborators so the state
//! machine, including the stop timeout, runs under test against fakes and
//! the paused tokio clock.

use std::path::PathBuf;
use std::time::Duration;

use bpm_common::{BoshPaths, BpmError, ContainerId};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::bundle::build_spec;
use crate::config::JobConfig;
use crate::layout::LayoutManager;
use crate::runc::{RuntimeClient, RuntimeError};
use crate::users::{UserFinder, VCAP_USER};

/// Default grace period a stopping container gets after SIGTERM.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between container state polls while stopping.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle operation errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A container runtime invocation failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// User resolution, layout preparation, or spec building failed.
    #[error(transparent)]
    Prep(#[from] BpmError),

    /// The container did not stop within the exit timeout.
    #[error("timed out waiting for the container to stop")]
    StopTimeout,

    /// The runtime reported no live init PID for the container.
    #[error("no pid for job")]
    MissingPid,
}

/// A running job process, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// The container ID.
    pub name: String,
    /// The init process PID.
    pub pid: u32,
}

/// Coordinates the lifecycle of one process's container.
#[derive(Debug)]
pub struct JobLifecycle<R, U, L> {
    runtime: R,
    users: U,
    layout: L,
    paths: BoshPaths,
    job_name: String,
    config: JobConfig,
    container_id: ContainerId,
    bundle_dir: PathBuf,
}

impl<R, U, L> JobLifecycle<R, U, L>
where
    R: RuntimeClient,
    U: UserFinder,
    L: LayoutManager,
{
    /// Create a coordinator for one process of a job.
    ///
    /// # Errors
    ///
    /// Returns an error when the job and process names cannot form a
    /// container ID.
    pub fn new(
        runtime: R,
        users: U,
        layout: L,
        paths: BoshPaths,
        job_name: impl Into<String>,
        config: JobConfig,
    ) -> Result<Self, LifecycleError> {
        let job_name = job_name.into();
        let container_id = ContainerId::for_process(&job_name, &config.name)?;
        let bundle_dir = paths.bundle_dir(&job_name, &config.name);

        Ok(Self {
            runtime,
            users,
            layout,
            paths,
            job_name,
            config,
            container_id,
            bundle_dir,
        })
    }

    /// The ID of the container this coordinator owns.
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// Prepare the job's filesystem, build its bundle, and run the
    /// container.
    ///
    /// Any step's failure aborts the start; cleanup of partial state is
    /// the caller's responsibility (typically [`Self::remove_job`]).
    pub async fn start_job(&self) -> Result<(), LifecycleError> {
        let user = self.users.lookup(VCAP_USER)?;

        let prereqs =
            self.layout
                .create_job_prerequisites(&self.paths, &self.job_name, &self.config, &user)?;

        let spec = build_spec(&self.paths, &self.job_name, &self.config, &user)?;

        self.runtime
            .create_bundle(&self.bundle_dir, &spec, &user)
            .await?;

        let pid_file = prereqs.pid_dir.join(format!("{}.pid", self.config.name));
        self.runtime
            .run_container(
                &pid_file,
                &self.bundle_dir,
                &self.container_id,
                prereqs.stdout,
                prereqs.stderr,
            )
            .await?;

        Ok(())
    }

    /// Send SIGTERM and wait up to `exit_timeout` for the container to
    /// stop.
    ///
    /// The runtime is polled once immediately and then every second.
    /// State-query failures are treated as transient and polling
    /// continues. When the timeout elapses first, returns
    /// [`LifecycleError::StopTimeout`]; the container is left for the
    /// caller to escalate with [`Self::remove_job`].
    pub async fn stop_job(&self, exit_timeout: Duration) -> Result<(), LifecycleError> {
        self.runtime.stop_container(&self.container_id).await?;

        let deadline = Instant::now() + exit_timeout;
        loop {
            match self.runtime.container_state(&self.container_id).await {
                Ok(state) if state.status.is_stopped() => return Ok(()),
                Ok(state) => {
                    debug!(container_id = %self.container_id, status = %state.status, "container still alive");
                }
                Err(err) => {
                    debug!(container_id = %self.container_id, error = %err, "state query failed, treating as transient");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LifecycleError::StopTimeout);
            }
            sleep(POLL_INTERVAL.min(remaining)).await;
            if Instant::now() >= deadline {
                return Err(LifecycleError::StopTimeout);
            }
        }
    }

    /// Delete the container and then destroy its bundle.
    ///
    /// The bundle is destroyed only after a successful delete so runtime
    /// bookkeeping is never orphaned.
    pub async fn remove_job(&self) -> Result<(), LifecycleError> {
        self.runtime.delete_container(&self.container_id).await?;
        self.runtime.destroy_bundle(&self.bundle_dir).await?;
        Ok(())
    }

    /// Resolve the running container's init PID.
    pub async fn get_job(&self) -> Result<Job, LifecycleError> {
        let state = self.runtime.container_state(&self.container_id).await?;
        let pid = state.init_pid().ok_or(LifecycleError::MissingPid)?;
        Ok(Job {
            name: self.container_id.to_string(),
            pid,
        })
    }
}
