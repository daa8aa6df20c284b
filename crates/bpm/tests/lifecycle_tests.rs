//! Tests for the job lifecycle state machine.
//!
//! The coordinator runs against fake collaborators and the paused tokio
//! clock, so call ordering, the stop polling cadence, and the exit
//! timeout are all checked deterministically.

use std::collections::VecDeque;
use std::fs::File;
use std::ops::Deref;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use bpm::config::JobConfig;
use bpm::layout::{JobPrereqs, LayoutManager};
use bpm::lifecycle::{JobLifecycle, LifecycleError};
use bpm::runc::{RuntimeClient, RuntimeError};
use bpm::users::{BpmUser, UserFinder};
use bpm_common::{BoshPaths, BpmError, BpmResult, ContainerId};
use bpm_oci::{ContainerState, ContainerStatus, Spec};

// =============================================================================
// Fakes
// =============================================================================

fn runtime_failure(op: &str) -> RuntimeError {
    RuntimeError::CommandFailed {
        command: format!("runc {op}"),
        status: std::process::ExitStatus::from_raw(256),
        stderr: "boom".to_string(),
    }
}

/// One scripted reply to a `container_state` query.
#[derive(Debug, Clone, Copy)]
enum StateReply {
    Running,
    Stopped,
    NoPid,
    Error,
}

impl StateReply {
    fn into_result(self, id: &ContainerId) -> Result<ContainerState, RuntimeError> {
        let state = |status: ContainerStatus, pid: Option<u32>| ContainerState {
            oci_version: "1.2.0".to_string(),
            id: id.to_string(),
            status,
            pid,
            bundle: PathBuf::new(),
        };

        match self {
            Self::Running => Ok(state(ContainerStatus::Running, Some(4242))),
            Self::Stopped => Ok(state(ContainerStatus::Stopped, None)),
            Self::NoPid => Ok(state(ContainerStatus::Running, None)),
            Self::Error => Err(runtime_failure("state")),
        }
    }
}

#[derive(Debug)]
struct CreatedBundle {
    bundle_dir: PathBuf,
    spec: Spec,
    user: BpmUser,
}

#[derive(Debug)]
struct RanContainer {
    pid_file: PathBuf,
    bundle_dir: PathBuf,
    id: String,
}

struct FakeRuntime {
    calls: Mutex<Vec<&'static str>>,
    created: Mutex<Option<CreatedBundle>>,
    ran: Mutex<Option<RanContainer>>,
    scripted_states: Mutex<VecDeque<StateReply>>,
    fallback_state: StateReply,
    fail_create: bool,
    fail_run: bool,
    fail_stop: bool,
    fail_delete: bool,
    fail_destroy: bool,
}

impl FakeRuntime {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(None),
            ran: Mutex::new(None),
            scripted_states: Mutex::new(VecDeque::new()),
            fallback_state: StateReply::Running,
            fail_create: false,
            fail_run: false,
            fail_stop: false,
            fail_delete: false,
            fail_destroy: false,
        }
    }

    fn with_states(states: impl IntoIterator<Item = StateReply>) -> Self {
        let fake = Self::new();
        fake.scripted_states.lock().unwrap().extend(states);
        fake
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn state_polls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == "container_state")
            .count()
    }
}

/// Local newtype around `Arc<FakeRuntime>` so the trait impl below stays
/// within this crate's orphan-rule allowance while still letting the
/// fixture hold a shared handle to the fake for post-hoc assertions.
#[derive(Clone)]
struct SharedRuntime(Arc<FakeRuntime>);

impl Deref for SharedRuntime {
    type Target = FakeRuntime;

    fn deref(&self) -> &FakeRuntime {
        &self.0
    }
}

#[async_trait]
impl RuntimeClient for SharedRuntime {
    async fn create_bundle(
        &self,
        bundle_dir: &Path,
        spec: &Spec,
        user: &BpmUser,
    ) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("create_bundle");
        if self.fail_create {
            return Err(runtime_failure("create"));
        }
        *self.created.lock().unwrap() = Some(CreatedBundle {
            bundle_dir: bundle_dir.to_path_buf(),
            spec: spec.clone(),
            user: user.clone(),
        });
        Ok(())
    }

    async fn run_container(
        &self,
        pid_file: &Path,
        bundle_dir: &Path,
        id: &ContainerId,
        _stdout: File,
        _stderr: File,
    ) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("run_container");
        if self.fail_run {
            return Err(runtime_failure("run"));
        }
        *self.ran.lock().unwrap() = Some(RanContainer {
            pid_file: pid_file.to_path_buf(),
            bundle_dir: bundle_dir.to_path_buf(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn container_state(&self, id: &ContainerId) -> Result<ContainerState, RuntimeError> {
        self.calls.lock().unwrap().push("container_state");
        let reply = self
            .scripted_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback_state);
        reply.into_result(id)
    }

    async fn stop_container(&self, _id: &ContainerId) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("stop_container");
        if self.fail_stop {
            return Err(runtime_failure("kill"));
        }
        Ok(())
    }

    async fn delete_container(&self, _id: &ContainerId) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("delete_container");
        if self.fail_delete {
            return Err(runtime_failure("delete"));
        }
        Ok(())
    }

    async fn destroy_bundle(&self, _bundle_dir: &Path) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("destroy_bundle");
        if self.fail_destroy {
            return Err(runtime_failure("destroy"));
        }
        Ok(())
    }
}

struct FakeUsers {
    lookups: Mutex<Vec<String>>,
    fail: bool,
}

impl FakeUsers {
    fn new() -> Self {
        Self {
            lookups: Mutex::new(Vec::new()),
            fail: false,
        }
    }
}

#[derive(Clone)]
struct SharedUsers(Arc<FakeUsers>);

impl Deref for SharedUsers {
    type Target = FakeUsers;

    fn deref(&self) -> &FakeUsers {
        &self.0
    }
}

impl UserFinder for SharedUsers {
    fn lookup(&self, name: &str) -> BpmResult<BpmUser> {
        self.lookups.lock().unwrap().push(name.to_string());
        if self.fail {
            return Err(BpmError::UnknownUser {
                name: name.to_string(),
            });
        }
        Ok(vcap())
    }
}

struct FakeLayout {
    pid_dir: PathBuf,
    requests: Mutex<Vec<(String, String, BpmUser)>>,
    fail: bool,
}

impl FakeLayout {
    fn new(pid_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid_dir: pid_dir.into(),
            requests: Mutex::new(Vec::new()),
            fail: false,
        }
    }
}

#[derive(Clone)]
struct SharedLayout(Arc<FakeLayout>);

impl Deref for SharedLayout {
    type Target = FakeLayout;

    fn deref(&self) -> &FakeLayout {
        &self.0
    }
}

impl LayoutManager for SharedLayout {
    fn create_job_prerequisites(
        &self,
        _paths: &BoshPaths,
        job: &str,
        config: &JobConfig,
        user: &BpmUser,
    ) -> BpmResult<JobPrereqs> {
        self.requests
            .lock()
            .unwrap()
            .push((job.to_string(), config.name.clone(), user.clone()));
        if self.fail {
            return Err(BpmError::filesystem(
                "create directory",
                "/system-root/sys/log",
                std::io::Error::new(std::io::ErrorKind::Other, "boom"),
            ));
        }
        Ok(JobPrereqs {
            pid_dir: self.pid_dir.clone(),
            stdout: tempfile::tempfile().unwrap(),
            stderr: tempfile::tempfile().unwrap(),
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn vcap() -> BpmUser {
    BpmUser {
        name: "vcap".to_string(),
        uid: 300,
        gid: 400,
    }
}

fn server_config() -> JobConfig {
    JobConfig {
        name: "server".to_string(),
        executable: "/bin/sleep".to_string(),
        args: vec!["60".to_string()],
        env: Vec::new(),
        limits: None,
    }
}

struct Fixture {
    runtime: SharedRuntime,
    users: SharedUsers,
    layout: SharedLayout,
    paths: BoshPaths,
    lifecycle: JobLifecycle<SharedRuntime, SharedUsers, SharedLayout>,
}

fn fixture(runtime: FakeRuntime, users: FakeUsers, layout: FakeLayout) -> Fixture {
    let runtime = SharedRuntime(Arc::new(runtime));
    let users = SharedUsers(Arc::new(users));
    let layout = SharedLayout(Arc::new(layout));
    let paths = BoshPaths::with_root("/system-root");

    let lifecycle = JobLifecycle::new(
        runtime.clone(),
        users.clone(),
        layout.clone(),
        paths.clone(),
        "example",
        server_config(),
    )
    .unwrap();

    Fixture {
        runtime,
        users,
        layout,
        paths,
        lifecycle,
    }
}

fn default_fixture() -> Fixture {
    fixture(
        FakeRuntime::new(),
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    )
}

// =============================================================================
// start_job
// =============================================================================

#[tokio::test]
async fn start_builds_the_bundle_and_runs_the_container() {
    let f = default_fixture();

    f.lifecycle.start_job().await.unwrap();

    assert_eq!(*f.users.lookups.lock().unwrap(), vec!["vcap"]);

    let requests = f.layout.requests.lock().unwrap();
    assert_eq!(
        *requests,
        vec![("example".to_string(), "server".to_string(), vcap())]
    );

    let created = f.runtime.created.lock().unwrap();
    let created = created.as_ref().unwrap();
    assert_eq!(created.bundle_dir, f.paths.bundle_dir("example", "server"));
    assert_eq!(created.spec.hostname.as_deref(), Some("example-server"));
    assert_eq!(created.user, vcap());

    let ran = f.runtime.ran.lock().unwrap();
    let ran = ran.as_ref().unwrap();
    assert_eq!(
        ran.pid_file,
        PathBuf::from("/system-root/sys/run/bpm/example/server.pid")
    );
    assert_eq!(ran.bundle_dir, f.paths.bundle_dir("example", "server"));
    assert_eq!(ran.id, "example-server");

    assert_eq!(f.runtime.calls(), vec!["create_bundle", "run_container"]);
}

#[tokio::test]
async fn start_aborts_when_user_lookup_fails() {
    let mut users = FakeUsers::new();
    users.fail = true;
    let f = fixture(
        FakeRuntime::new(),
        users,
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f.lifecycle.start_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Prep(_)));
    assert!(f.layout.requests.lock().unwrap().is_empty());
    assert!(f.runtime.calls().is_empty());
}

#[tokio::test]
async fn start_aborts_when_prerequisites_fail() {
    let mut layout = FakeLayout::new("/system-root/sys/run/bpm/example");
    layout.fail = true;
    let f = fixture(FakeRuntime::new(), FakeUsers::new(), layout);

    let err = f.lifecycle.start_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Prep(_)));
    assert!(f.runtime.calls().is_empty());
}

#[tokio::test]
async fn start_aborts_when_bundle_creation_fails() {
    let mut runtime = FakeRuntime::new();
    runtime.fail_create = true;
    let f = fixture(
        runtime,
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f.lifecycle.start_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Runtime(_)));
    assert_eq!(f.runtime.calls(), vec!["create_bundle"]);
}

#[tokio::test]
async fn start_surfaces_run_failure() {
    let mut runtime = FakeRuntime::new();
    runtime.fail_run = true;
    let f = fixture(
        runtime,
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f.lifecycle.start_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Runtime(_)));
    assert_eq!(f.runtime.calls(), vec!["create_bundle", "run_container"]);
}

// =============================================================================
// stop_job
// =============================================================================

#[tokio::test]
async fn stop_returns_once_the_container_is_stopped() {
    let f = fixture(
        FakeRuntime::with_states([StateReply::Stopped]),
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    f.lifecycle
        .stop_job(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(f.runtime.calls(), vec!["stop_container", "container_state"]);
}

#[tokio::test(start_paused = true)]
async fn stop_polls_every_second_until_stopped() {
    let f = fixture(
        FakeRuntime::with_states([StateReply::Running, StateReply::Running, StateReply::Stopped]),
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let started = tokio::time::Instant::now();
    f.lifecycle
        .stop_job(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(f.runtime.state_polls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn stop_times_out_when_the_container_never_stops() {
    let f = default_fixture();

    let started = tokio::time::Instant::now();
    let err = f
        .lifecycle
        .stop_job(Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::StopTimeout));
    // One immediate poll, then one per 1-second tick.
    assert_eq!(f.runtime.state_polls(), 5);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_polling_through_state_errors() {
    let mut runtime = FakeRuntime::new();
    runtime.fallback_state = StateReply::Error;
    let f = fixture(
        runtime,
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f
        .lifecycle
        .stop_job(Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::StopTimeout));
    assert_eq!(f.runtime.state_polls(), 5);
}

#[tokio::test(start_paused = true)]
async fn stop_recovers_from_transient_state_errors() {
    let f = fixture(
        FakeRuntime::with_states([StateReply::Error, StateReply::Error, StateReply::Stopped]),
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    f.lifecycle
        .stop_job(Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(f.runtime.state_polls(), 3);
}

#[tokio::test]
async fn stop_fails_fast_when_the_signal_fails() {
    let mut runtime = FakeRuntime::new();
    runtime.fail_stop = true;
    let f = fixture(
        runtime,
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f
        .lifecycle
        .stop_job(Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::Runtime(_)));
    assert_eq!(f.runtime.state_polls(), 0);
}

// =============================================================================
// remove_job
// =============================================================================

#[tokio::test]
async fn remove_deletes_the_container_then_the_bundle() {
    let f = default_fixture();

    f.lifecycle.remove_job().await.unwrap();

    assert_eq!(f.runtime.calls(), vec!["delete_container", "destroy_bundle"]);
}

#[tokio::test]
async fn remove_keeps_the_bundle_when_delete_fails() {
    let mut runtime = FakeRuntime::new();
    runtime.fail_delete = true;
    let f = fixture(
        runtime,
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f.lifecycle.remove_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Runtime(_)));
    assert_eq!(f.runtime.calls(), vec!["delete_container"]);
}

#[tokio::test]
async fn remove_surfaces_bundle_destruction_failure() {
    let mut runtime = FakeRuntime::new();
    runtime.fail_destroy = true;
    let f = fixture(
        runtime,
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f.lifecycle.remove_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::Runtime(_)));
}

// =============================================================================
// get_job
// =============================================================================

#[tokio::test]
async fn get_job_reports_the_init_pid() {
    let f = default_fixture();

    let job = f.lifecycle.get_job().await.unwrap();
    assert_eq!(job.name, "example-server");
    assert_eq!(job.pid, 4242);
}

#[tokio::test]
async fn get_job_without_a_pid_is_an_error() {
    let f = fixture(
        FakeRuntime::with_states([StateReply::NoPid]),
        FakeUsers::new(),
        FakeLayout::new("/system-root/sys/run/bpm/example"),
    );

    let err = f.lifecycle.get_job().await.unwrap_err();
    assert!(matches!(err, LifecycleError::MissingPid));
}
