//! Process spawning and reaping.
//!
//! All `waitpid` calls in agent-init go through [`ProcessTable::reap_zombies`].
//! Phase commands are registered in the table when they are spawned so the
//! reaper can hand their exit status back to the phase waiting on them;
//! every other child it collects is an adopted orphan.

use crate::command::{CommandSpec, Phase};
use crate::error::{Error, Result};
use crate::signals::{signal_name, SignalForwarder};
use libc::c_int;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Exit status of a reaped process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process ID
    pub pid: u32,
    /// Exit code (if exited normally)
    pub code: Option<i32>,
    /// Signal (if killed by signal)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Decode a raw `waitpid` status; `None` for anything that is not a termination.
    pub fn from_raw(pid: u32, status: c_int) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(Self {
                pid,
                code: Some(libc::WEXITSTATUS(status)),
                signal: None,
            })
        } else if libc::WIFSIGNALED(status) {
            Some(Self {
                pid,
                code: None,
                signal: Some(libc::WTERMSIG(status)),
            })
        } else {
            None
        }
    }

    /// Check if the process exited on its own rather than by a signal.
    pub fn exited_normally(&self) -> bool {
        self.code.is_some()
    }

    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit status {}", code),
            (None, Some(sig)) => write!(f, "killed by {}", signal_name(sig)),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Binary verdict on a phase. The numeric exit code is deliberately dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub exited_normally: bool,
    pub success: bool,
}

impl RunOutcome {
    /// Outcome of a command that never ran, or whose status was lost.
    pub const NOT_STARTED: RunOutcome = RunOutcome {
        exited_normally: false,
        success: false,
    };
}

impl From<&ExitStatus> for RunOutcome {
    fn from(status: &ExitStatus) -> Self {
        Self {
            exited_normally: status.exited_normally(),
            success: status.success(),
        }
    }
}

type Waiters = HashMap<u32, oneshot::Sender<ExitStatus>>;

/// Registry of spawned phase processes awaiting their exit status.
///
/// The lock is held across `spawn` and across each reaping pass, so a child
/// can never be collected before its waiter is registered.
#[derive(Clone, Default)]
pub struct ProcessTable {
    waiters: Arc<Mutex<Waiters>>,
}

impl ProcessTable {
    /// Create an empty process table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a command in its own process group with inherited stdout/stderr.
    pub fn spawn(&self, spec: &CommandSpec) -> Result<RunningCommand> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);

        let mut waiters = self.lock();
        let child = cmd.spawn().map_err(|e| Error::SpawnFailed {
            program: spec.program.clone(),
            source: e,
        })?;

        let pid = child.id();
        let (tx, rx) = oneshot::channel();
        waiters.insert(pid, tx);

        Ok(RunningCommand { pid, exit_rx: rx })
    }

    /// Check whether a PID is still waiting to be reaped.
    pub fn is_tracked(&self, pid: u32) -> bool {
        self.lock().contains_key(&pid)
    }

    /// Reap every terminated child without blocking (PID 1 duty).
    ///
    /// Statuses of tracked processes are handed to their waiters; the rest
    /// are orphans and are only logged.
    pub fn reap_zombies(&self) -> Vec<ExitStatus> {
        let mut waiters = self.lock();
        let mut statuses = Vec::new();

        loop {
            // Raw waitpid: nix's WaitStatus rejects real-time termination signals.
            let mut raw: c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut raw, libc::WNOHANG) };

            if pid == 0 {
                // No more zombies to reap
                break;
            }
            if pid < 0 {
                match Errno::last() {
                    Errno::ECHILD => break,
                    Errno::EINTR => continue,
                    e => {
                        error!(error = %e, "Error reaping zombies");
                        break;
                    }
                }
            }

            let Some(status) = ExitStatus::from_raw(pid as u32, raw) else {
                continue;
            };
            match waiters.remove(&status.pid) {
                Some(tx) => {
                    debug!(pid = status.pid, status = %status, "Reaped phase process");
                    // Receiver gone means nobody is waiting anymore.
                    let _ = tx.send(status.clone());
                }
                None => {
                    debug!(pid = status.pid, status = %status, "Reaped orphaned process");
                }
            }
            statuses.push(status);
        }

        statuses
    }
}

/// Handle to a spawned phase process.
#[derive(Debug)]
pub struct RunningCommand {
    pid: u32,
    exit_rx: oneshot::Receiver<ExitStatus>,
}

impl RunningCommand {
    /// Process ID of the command.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process group of the command; equal to its PID.
    pub fn pgid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }

    /// Send a signal to the command and everything in its process group.
    pub fn signal_group(&self, sig: Signal) -> Result<()> {
        killpg(self.pgid(), sig)?;
        Ok(())
    }

    /// Wait until the reaper collects the command's exit status.
    pub async fn wait(self) -> Result<ExitStatus> {
        let pid = self.pid;
        self.exit_rx.await.map_err(|_| Error::ExitStatusLost(pid))
    }
}

/// Runs phase commands with signal forwarding active while each one runs.
///
/// The signal receivers are kept between phases, so a signal arriving while
/// no command runs reaches the next command once it starts.
pub struct CommandRunner {
    table: ProcessTable,
    forwarder: Option<SignalForwarder>,
}

impl CommandRunner {
    /// Create a runner that registers its children in `table`.
    pub fn new(table: ProcessTable) -> Self {
        Self {
            table,
            forwarder: None,
        }
    }

    /// Start receiving forwarded signals ahead of the first phase.
    pub fn register_signals(&mut self) -> Result<()> {
        if self.forwarder.is_none() {
            self.forwarder = Some(SignalForwarder::register()?);
        }
        Ok(())
    }

    /// Spawn `spec` and wait for it to exit.
    ///
    /// Returns an error only when the command could not be started or its
    /// status could not be collected; a non-zero exit is an `Ok` status.
    pub async fn run(&mut self, phase: Phase, spec: &CommandSpec) -> Result<ExitStatus> {
        let forwarder = match self.forwarder.take() {
            Some(forwarder) => forwarder,
            None => SignalForwarder::register()?,
        };

        let child = match self.table.spawn(spec) {
            Ok(child) => child,
            Err(e) => {
                self.forwarder = Some(forwarder);
                return Err(e);
            }
        };
        let forwarding = forwarder.attach(child.pgid());
        info!(phase = %phase, pid = child.pid(), "Spawned process");

        let status = child.wait().await;
        self.forwarder = forwarding.detach().await;
        status
    }
}
