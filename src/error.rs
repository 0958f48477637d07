//! Error types for agent-init.

use crate::command::Phase;
use crate::process::ExitStatus;
use thiserror::Error;

/// Result type alias for init operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while sequencing phases.
#[derive(Error, Debug)]
pub enum Error {
    /// No main command was given
    #[error("No main command defined")]
    MissingMainCommand,

    /// Command line contained no program
    #[error("Empty command line")]
    EmptyCommand,

    /// Program could not be started
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program ran and did not exit cleanly
    #[error("{phase} command failed: {status}")]
    CommandFailed { phase: Phase, status: ExitStatus },

    /// The reaper went away before the child's exit status was handed over
    #[error("Exit status of PID {0} was never collected")]
    ExitStatusLost(u32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
