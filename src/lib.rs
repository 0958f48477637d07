//! agent-init - a minimal PID 1 for agent containers.
//!
//! Runs up to three commands in strict sequence and performs the two duties
//! of any process running as PID 1:
//!
//! - Reaping zombie processes, including orphans adopted from exited parents
//! - Forwarding received signals to the running command's process group
//!
//! # Architecture
//!
//! - **Supervisor**: sequences pre-start, main and post-stop and decides the exit code
//! - **ZombieReaper**: background task collecting every terminated child
//! - **CommandRunner**: spawns a phase command in its own process group
//! - **SignalForwarder**: relays signals to that group while the command runs
//!
//! POSIX only. Subreaper registration (for running below PID 1) is Linux only.
//!
//! # Example
//!
//! ```no_run
//! use agent_init::{BuildInfo, InitConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = InitConfig::from_command_lines("", "java -jar agent.jar", "")?;
//!     let result = Supervisor::new(config, BuildInfo::from_build_env()).run().await?;
//!     std::process::exit(result.exit_code() as i32);
//! }
//! ```

pub mod command;
pub mod error;
pub mod init;
pub mod process;
pub mod reaper;
pub mod signals;

// Re-export main types
pub use command::{CommandSpec, Phase};
pub use error::{Error, Result};
pub use init::{BuildInfo, InitConfig, Supervisor, SupervisorResult};
pub use process::{CommandRunner, ExitStatus, ProcessTable, RunOutcome, RunningCommand};
pub use reaper::{ZombieReaper, DEFAULT_REAP_INTERVAL};
pub use signals::{
    forward_signal, forwarded_signals, signal_name, Forwarded, ForwarderHandle, SignalForwarder,
    FORWARDED_SIGNALS,
};
