//! agent-init binary.
//!
//! Meant to be the entrypoint of an agent container:
//!
//! ```text
//! agent-init --pre "/usr/local/bin/configure-agent" --main "/usr/local/bin/run-jnlp-client"
//! ```

use agent_init::{BuildInfo, InitConfig, Supervisor};
use anyhow::Context;
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "agent-init",
    about = "Minimal PID 1 - runs pre-start, main and post-stop commands, reaps zombies, forwards signals",
    disable_version_flag = true
)]
struct Cli {
    /// Pre-start command
    #[arg(long, env = "AGENT_INIT_PRE", default_value = "")]
    pre: String,

    /// Main command
    #[arg(long, env = "AGENT_INIT_MAIN", default_value = "")]
    main: String,

    /// Post-stop command
    #[arg(long, env = "AGENT_INIT_POST", default_value = "")]
    post: String,

    /// Display agent-init version
    #[arg(long)]
    version: bool,

    /// Don't register as child subreaper when not running as PID 1
    #[arg(long)]
    no_subreaper: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Only two exit codes exist; help output is not a failure.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let build = BuildInfo::from_build_env();
    if cli.version {
        println!("{}", build.version);
        return ExitCode::SUCCESS;
    }

    match run(cli, build).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, build: BuildInfo) -> anyhow::Result<ExitCode> {
    // Initialize logging. stdout belongs to the phase commands.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let mut config = InitConfig::from_command_lines(&cli.pre, &cli.main, &cli.post)
        .context("Invalid configuration, exiting")?;
    config.subreaper = !cli.no_subreaper;

    let result = Supervisor::new(config, build)
        .run()
        .await
        .context("Failed to start supervisor")?;

    Ok(ExitCode::from(result.exit_code()))
}
