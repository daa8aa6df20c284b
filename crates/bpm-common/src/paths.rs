//! Standard filesystem paths under the BOSH system root.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default system root for all BPM paths.
pub static BOSH_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BPM_BOSH_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/vcap"))
});

/// Standard paths used by BPM, all derived from a single system root.
#[derive(Debug, Clone)]
pub struct BoshPaths {
    /// System root directory (default: /var/vcap).
    pub root: PathBuf,
}

impl BoshPaths {
    /// Create paths with the default system root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom system root.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Log directory for a job.
    #[must_use]
    pub fn log_dir(&self, job: &str) -> PathBuf {
        self.root.join("sys").join("log").join(job)
    }

    /// Stdout log file for a process of a job.
    #[must_use]
    pub fn stdout_log(&self, job: &str, process: &str) -> PathBuf {
        self.log_dir(job).join(format!("{process}.out.log"))
    }

    /// Stderr log file for a process of a job.
    #[must_use]
    pub fn stderr_log(&self, job: &str, process: &str) -> PathBuf {
        self.log_dir(job).join(format!("{process}.err.log"))
    }

    /// Pidfile directory for a job.
    #[must_use]
    pub fn pid_dir(&self, job: &str) -> PathBuf {
        self.root.join("sys").join("run").join("bpm").join(job)
    }

    /// Pidfile for a process of a job.
    #[must_use]
    pub fn pid_file(&self, job: &str, process: &str) -> PathBuf {
        self.pid_dir(job).join(format!("{process}.pid"))
    }

    /// OCI bundle directory for a process of a job.
    #[must_use]
    pub fn bundle_dir(&self, job: &str, process: &str) -> PathBuf {
        self.root
            .join("data")
            .join("bpm")
            .join("bundles")
            .join(job)
            .join(process)
    }

    /// BOSH packages directory (bind-mounted read-only into containers).
    #[must_use]
    pub fn packages(&self) -> PathBuf {
        self.root.join("packages")
    }

    /// Compiled packages data directory (bind-mounted read-only).
    #[must_use]
    pub fn data_packages(&self) -> PathBuf {
        self.root.join("data").join("packages")
    }

    /// Configuration directory for a job (bind-mounted read-only).
    #[must_use]
    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.root.join("jobs").join(job)
    }

    /// The container runtime binary, as deployed by the runc BOSH package.
    #[must_use]
    pub fn runc(&self) -> PathBuf {
        self.root
            .join("packages")
            .join("runc")
            .join("bin")
            .join("runc")
    }
}

impl Default for BoshPaths {
    fn default() -> Self {
        Self {
            root: BOSH_ROOT.clone(),
        }
    }
}

impl AsRef<Path> for BoshPaths {
    fn as_ref(&self) -> &Path {
        &self.root
    }
}
