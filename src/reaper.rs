//! Background zombie reaper.

use crate::error::Result;
use crate::process::ProcessTable;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Idle time between reaping passes when no child has exited.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Long-lived task reclaiming every terminated child of this process.
///
/// Each pass drains all pending zombies, then idles for the interval or
/// until the next SIGCHLD, whichever comes first.
pub struct ZombieReaper {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ZombieReaper {
    /// Start reaping on the current runtime.
    pub fn spawn(table: ProcessTable, interval: Duration) -> Result<Self> {
        let mut sigchld = signal(SignalKind::child())?;
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Zombie reaper started");
            loop {
                table.reap_zombies();

                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => {}
                    Some(()) = sigchld.recv() => {}
                }
            }
        });

        Ok(Self { stop_tx, task })
    }

    /// Check whether the reaper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the reaper and wait for its task to complete.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        match self.task.await {
            Ok(()) => info!("Zombie reaper stopped"),
            Err(e) => error!(error = %e, "Zombie reaper task failed"),
        }
    }
}

/// Become the reaper of orphaned descendants when not running as PID 1.
#[cfg(target_os = "linux")]
pub fn register_subreaper() -> Result<()> {
    let one: libc::c_ulong = 1;
    let zero: libc::c_ulong = 0;
    let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, one, zero, zero, zero) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Subreapers are Linux-only; orphans go to the real init elsewhere.
#[cfg(not(target_os = "linux"))]
pub fn register_subreaper() -> Result<()> {
    Ok(())
}
