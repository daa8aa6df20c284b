//! Generation of the OCI runtime specification for a job process.
//!
//! The generated spec gives the process a read-only root filesystem with
//! an explicit list of writable bind mounts (the job's log and pidfile
//! directories), so a job can write its logs and pidfiles while accidental
//! modification of the host filesystem stays impossible.

use bpm_common::{BoshPaths, BpmResult, ByteQuantity, ContainerId};
use bpm_oci::{
    Capabilities, Linux, MemoryResources, Mount, Namespace, NamespaceType, PidsResources, Process,
    Resources, Rlimit, Root, Spec, User,
};

use crate::config::JobConfig;
use crate::users::BpmUser;

/// Default PATH injected when the configuration does not provide one.
const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The reduced capability set granted to job processes.
const PROCESS_CAPABILITIES: &[&str] = &[
    "CAP_AUDIT_WRITE",
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_MKNOD",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_RAW",
    "CAP_SETFCAP",
    "CAP_SETGID",
    "CAP_SETPCAP",
    "CAP_SETUID",
    "CAP_SYS_CHROOT",
];

/// Build the full OCI runtime spec for a process of a job.
///
/// # Errors
///
/// Returns an error when the configured memory limit is not a valid byte
/// quantity, or when the job and process names cannot form a container ID.
pub fn build_spec(
    paths: &BoshPaths,
    job: &str,
    config: &JobConfig,
    user: &BpmUser,
) -> BpmResult<Spec> {
    let container_id = ContainerId::for_process(job, &config.name)?;

    let mut env = config.env.clone();
    if !env.iter().any(|e| e.starts_with("PATH=")) {
        env.push(DEFAULT_PATH.to_string());
    }

    let mut args = Vec::with_capacity(1 + config.args.len());
    args.push(config.executable.clone());
    args.extend(config.args.iter().cloned());

    let mut process = Process {
        terminal: false,
        user: User {
            uid: user.uid,
            gid: user.gid,
        },
        args,
        env,
        cwd: "/".into(),
        capabilities: Some(process_capabilities()),
        rlimits: Vec::new(),
        no_new_privileges: true,
    };

    let mut linux = Linux {
        namespaces: vec![
            Namespace::new(NamespaceType::Pid),
            Namespace::new(NamespaceType::Ipc),
            Namespace::new(NamespaceType::Uts),
            Namespace::new(NamespaceType::Mount),
        ],
        resources: None,
    };

    if let Some(limits) = &config.limits {
        let memory = limits
            .memory
            .as_deref()
            .map(ByteQuantity::parse)
            .transpose()?
            .map(|quantity| {
                let bytes = quantity.as_bytes() as i64;
                MemoryResources {
                    // limit == swap disables swap: the container is
                    // OOM-killed at the declared boundary.
                    limit: Some(bytes),
                    swap: Some(bytes),
                }
            });

        let pids = limits.processes.map(|limit| PidsResources {
            limit: limit as i64,
        });

        if memory.is_some() || pids.is_some() {
            linux.resources = Some(Resources { memory, pids });
        }

        if let Some(open_files) = limits.open_files {
            process.rlimits.push(Rlimit {
                limit_type: "RLIMIT_NOFILE".to_string(),
                hard: open_files,
                soft: open_files,
            });
        }
    }

    Ok(Spec {
        root: Some(Root {
            path: "rootfs".into(),
            readonly: true,
        }),
        process: Some(process),
        hostname: Some(container_id.to_string()),
        mounts: job_mounts(paths, job),
        linux: Some(linux),
        ..Default::default()
    })
}

fn process_capabilities() -> Capabilities {
    let caps: Vec<String> = PROCESS_CAPABILITIES.iter().map(ToString::to_string).collect();
    Capabilities {
        bounding: caps.clone(),
        effective: caps.clone(),
        inheritable: caps.clone(),
        permitted: caps,
        ambient: Vec::new(),
    }
}

fn job_mounts(paths: &BoshPaths, job: &str) -> Vec<Mount> {
    let mut mounts = vec![
        system_mount("/proc", "proc", "proc", &[]),
        system_mount(
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        system_mount(
            "/dev/pts",
            "devpts",
            "devpts",
            &[
                "nosuid",
                "noexec",
                "newinstance",
                "ptmxmode=0666",
                "mode=0620",
                "gid=5",
            ],
        ),
        system_mount(
            "/dev/shm",
            "tmpfs",
            "shm",
            &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
        ),
        system_mount("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        system_mount("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
    ];

    // Writable binds for the job's own logs and pidfiles.
    mounts.push(bind_mount(paths.log_dir(job), false));
    mounts.push(bind_mount(paths.pid_dir(job), false));

    // Read-only binds exposing the BOSH packages and job configuration.
    mounts.push(bind_mount(paths.data_packages(), true));
    mounts.push(bind_mount(paths.packages(), true));
    mounts.push(bind_mount(paths.job_dir(job), true));

    mounts
}

fn system_mount(destination: &str, mount_type: &str, source: &str, options: &[&str]) -> Mount {
    Mount {
        destination: destination.into(),
        mount_type: Some(mount_type.to_string()),
        source: Some(source.into()),
        options: options.iter().map(ToString::to_string).collect(),
    }
}

fn bind_mount(path: std::path::PathBuf, readonly: bool) -> Mount {
    Mount {
        destination: path.clone(),
        mount_type: Some("bind".to_string()),
        source: Some(path),
        options: vec![
            "nosuid".to_string(),
            "nodev".to_string(),
            "rbind".to_string(),
            if readonly { "ro" } else { "rw" }.to_string(),
        ],
    }
}
