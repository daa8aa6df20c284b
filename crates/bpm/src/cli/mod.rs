//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};

use bpm_common::BoshPaths;

use crate::config::JobConfig;
use crate::layout::HostLayout;
use crate::lifecycle::{JobLifecycle, DEFAULT_EXIT_TIMEOUT};
use crate::runc::RuncClient;
use crate::users::SystemUserFinder;

/// BPM - BOSH Process Manager
#[derive(Parser)]
#[command(name = "bpm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// BOSH system root used for all path derivation
    #[arg(
        long,
        global = true,
        env = "BPM_BOSH_ROOT",
        default_value = "/var/vcap"
    )]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// The BPM subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start a BOSH process in its own container
    Start {
        /// The job and configuration to operate on
        #[command(flatten)]
        target: JobArgs,
    },

    /// Stop a BOSH process and remove its container
    Stop {
        /// The job and configuration to operate on
        #[command(flatten)]
        target: JobArgs,
    },

    /// Print the init PID of a running BOSH process
    Pid {
        /// The job and configuration to operate on
        #[command(flatten)]
        target: JobArgs,
    },

    /// Attach strace to a running BOSH process
    ///
    /// Executes `strace -s 100 -f -y -yy -p <pid>`, resolving the PID the
    /// same way as `bpm pid`. This may impact performance.
    Trace {
        /// The job and configuration to operate on
        #[command(flatten)]
        target: JobArgs,
    },
}

/// Flags shared by every subcommand.
#[derive(Args)]
pub struct JobArgs {
    /// The job name
    #[arg(short = 'j', long = "job")]
    pub job: Option<String>,

    /// The path to the process configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
}

impl JobArgs {
    fn job(&self) -> Result<&str> {
        self.job
            .as_deref()
            .filter(|job| !job.is_empty())
            .ok_or_else(|| eyre!("must specify a job"))
    }

    fn config_path(&self) -> Result<&Path> {
        self.config
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| eyre!("must specify a configuration file"))
    }
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let paths = BoshPaths::with_root(&self.root);
        match self.command {
            Commands::Start { target } => start(&paths, &target).await,
            Commands::Stop { target } => stop(&paths, &target).await,
            Commands::Pid { target } => pid(&paths, &target).await,
            Commands::Trace { target } => trace(&paths, &target).await,
        }
    }
}

type HostLifecycle = JobLifecycle<RuncClient, SystemUserFinder, HostLayout>;

fn load_config(path: &Path) -> Result<JobConfig> {
    JobConfig::load(path)
        .map_err(|err| eyre!("failed to load config at {}: {}", path.display(), err))
}

fn host_lifecycle(paths: &BoshPaths, target: &JobArgs) -> Result<(HostLifecycle, JobConfig)> {
    let job = target.job()?;
    let config = load_config(target.config_path()?)?;

    let lifecycle = JobLifecycle::new(
        RuncClient::new(paths.runc()),
        SystemUserFinder,
        HostLayout,
        paths.clone(),
        job,
        config.clone(),
    )?;
    Ok((lifecycle, config))
}

async fn start(paths: &BoshPaths, target: &JobArgs) -> Result<()> {
    let (lifecycle, config) = host_lifecycle(paths, target)?;
    tracing::info!(
        container_id = %lifecycle.container_id(),
        executable = %config.executable,
        "starting job"
    );

    if let Err(err) = lifecycle.start_job().await {
        tracing::warn!(
            container_id = %lifecycle.container_id(),
            error = %err,
            "start failed, removing container artifacts"
        );
        if let Err(cleanup_err) = lifecycle.remove_job().await {
            tracing::debug!(error = %cleanup_err, "cleanup after failed start was incomplete");
        }
        return Err(eyre!("failed to start job: {err}"));
    }
    Ok(())
}

async fn stop(paths: &BoshPaths, target: &JobArgs) -> Result<()> {
    let (lifecycle, _) = host_lifecycle(paths, target)?;
    tracing::info!(container_id = %lifecycle.container_id(), "stopping job");

    lifecycle
        .stop_job(DEFAULT_EXIT_TIMEOUT)
        .await
        .map_err(|err| eyre!("failed to stop job: {err}"))?;
    lifecycle
        .remove_job()
        .await
        .map_err(|err| eyre!("failed to remove job: {err}"))?;
    Ok(())
}

async fn pid(paths: &BoshPaths, target: &JobArgs) -> Result<()> {
    let (lifecycle, _) = host_lifecycle(paths, target)?;
    let job = lifecycle
        .get_job()
        .await
        .map_err(|err| eyre!("failed to get job: {err}"))?;
    println!("{}", job.pid);
    Ok(())
}

async fn trace(paths: &BoshPaths, target: &JobArgs) -> Result<()> {
    let (lifecycle, _) = host_lifecycle(paths, target)?;
    let job = lifecycle
        .get_job()
        .await
        .map_err(|err| eyre!("failed to get job: {err}"))?;

    let status = tokio::process::Command::new("strace")
        .args(["-s", "100", "-f", "-y", "-yy", "-p"])
        .arg(job.pid.to_string())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|err| eyre!("failed to run strace: {err}"))?;

    if !status.success() {
        return Err(eyre!("strace exited with {status}"));
    }
    Ok(())
}
