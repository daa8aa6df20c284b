//! BPM CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bpm::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize tracing; diagnostics go to stderr so command output
    // (e.g. `bpm pid`) stays clean on stdout.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("bpm=info".parse()?))
        .init();

    // Parse CLI arguments; usage errors exit 1, help and version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if err.use_stderr() {
                let _ = err.print();
                std::process::exit(1);
            }
            err.exit();
        }
    };

    // Execute command
    cli.execute().await
}
