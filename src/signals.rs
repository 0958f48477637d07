//! Signal forwarding to the running phase command.
//!
//! While a phase command runs, every signal returned by [`forwarded_signals`]
//! that reaches agent-init is re-sent to the command's process group. SIGCHLD
//! is never forwarded: it only concerns the reaper.
//!
//! Receivers are registered once and kept for the life of the process. A
//! signal that arrives while no command runs is held and relayed to the next
//! phase's group as soon as it starts; one arriving after the last phase is
//! dropped.
//!
//! Signals are handled as raw numbers because [`Signal`] cannot represent the
//! real-time range.

use crate::error::Result;
use libc::c_int;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::future::poll_fn;
use std::task::Poll;
use tokio::signal::unix::{signal, Signal as SignalStream, SignalKind};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Standard signals relayed to the phase command's process group.
///
/// SIGABRT, SIGSYS and SIGTRAP are included: sent with `kill` they are
/// ordinary asynchronous signals. Left out: SIGCHLD (reaper wake-up), SIGKILL
/// and SIGSTOP (uncatchable), the synchronous faults SIGILL, SIGFPE, SIGSEGV
/// and SIGBUS, SIGPIPE and SIGURG.
pub const FORWARDED_SIGNALS: &[c_int] = &[
    libc::SIGHUP,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGALRM,
    libc::SIGCONT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGVTALRM,
    libc::SIGPROF,
    libc::SIGXCPU,
    libc::SIGXFSZ,
    libc::SIGWINCH,
    libc::SIGIO,
    libc::SIGABRT,
    libc::SIGSYS,
    libc::SIGTRAP,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    libc::SIGPWR,
];

/// Real-time signals, `SIGRTMIN..=SIGRTMAX`.
#[cfg(target_os = "linux")]
pub fn realtime_signals() -> impl Iterator<Item = c_int> {
    libc::SIGRTMIN()..=libc::SIGRTMAX()
}

#[cfg(not(target_os = "linux"))]
pub fn realtime_signals() -> impl Iterator<Item = c_int> {
    std::iter::empty()
}

/// Every signal relayed to the phase command: [`FORWARDED_SIGNALS`] plus the
/// real-time range where the platform has one.
pub fn forwarded_signals() -> Vec<c_int> {
    FORWARDED_SIGNALS
        .iter()
        .copied()
        .chain(realtime_signals())
        .collect()
}

#[cfg(target_os = "linux")]
fn realtime_offset(sig: c_int) -> Option<c_int> {
    (libc::SIGRTMIN()..=libc::SIGRTMAX())
        .contains(&sig)
        .then(|| sig - libc::SIGRTMIN())
}

#[cfg(not(target_os = "linux"))]
fn realtime_offset(_sig: c_int) -> Option<c_int> {
    None
}

/// Human-readable name of a signal number, e.g. `SIGTERM` or `SIGRTMIN+3`.
pub fn signal_name(sig: c_int) -> String {
    if let Ok(known) = Signal::try_from(sig) {
        return known.as_str().to_string();
    }
    match realtime_offset(sig) {
        Some(0) => "SIGRTMIN".to_string(),
        Some(offset) => format!("SIGRTMIN+{}", offset),
        None => format!("signal {}", sig),
    }
}

/// What happened to a received signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    /// Sent to the process group
    Delivered,
    /// Child notification, kept for ourselves
    Skipped,
    /// Group already gone or not signalable
    Undeliverable,
}

/// Relay `sig` to process group `pgid`.
///
/// Delivery failures are logged and otherwise ignored; they cannot change
/// the outcome of the phase.
pub fn forward_signal(pgid: Pid, sig: c_int) -> Forwarded {
    if sig == libc::SIGCHLD {
        return Forwarded::Skipped;
    }

    let rc = unsafe { libc::killpg(pgid.as_raw(), sig) };
    if rc == 0 {
        debug!(pgid = pgid.as_raw(), signal = %signal_name(sig), "Forwarded signal");
        Forwarded::Delivered
    } else {
        let e = std::io::Error::last_os_error();
        debug!(
            pgid = pgid.as_raw(),
            signal = %signal_name(sig),
            error = %e,
            "Failed to forward signal"
        );
        Forwarded::Undeliverable
    }
}

/// Signal receivers that outlive individual phases.
///
/// Registering before the first spawn means a signal arriving before a
/// command exists is queued and forwarded once the forwarder is attached.
pub struct SignalForwarder {
    receivers: Vec<(c_int, SignalStream)>,
}

impl SignalForwarder {
    /// Register a receiver for every signal in [`forwarded_signals`].
    ///
    /// A standard signal that cannot be registered is an error; a real-time
    /// one is logged and left at its default disposition.
    pub fn register() -> Result<Self> {
        let mut receivers = Vec::with_capacity(FORWARDED_SIGNALS.len());
        for &sig in FORWARDED_SIGNALS {
            receivers.push((sig, signal(SignalKind::from_raw(sig))?));
        }
        for sig in realtime_signals() {
            match signal(SignalKind::from_raw(sig)) {
                Ok(stream) => receivers.push((sig, stream)),
                Err(e) => {
                    warn!(signal = %signal_name(sig), error = %e, "Cannot forward signal")
                }
            }
        }
        Ok(Self { receivers })
    }

    /// Number of signals being received.
    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    /// Check whether no signal is being received.
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Start relaying to `pgid` until the returned handle is detached.
    pub fn attach(self, pgid: Pid) -> ForwarderHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let mut forwarder = self;

        let task = tokio::spawn(async move {
            loop {
                // Stop wins: a signal still pending once the command is gone
                // stays queued for the next phase.
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    sig = forwarder.next_signal() => {
                        forward_signal(pgid, sig);
                    }
                }
            }
            forwarder
        });

        ForwarderHandle { stop_tx, task }
    }

    async fn next_signal(&mut self) -> c_int {
        poll_fn(|cx| {
            for (sig, stream) in self.receivers.iter_mut() {
                if let Poll::Ready(Some(())) = stream.poll_recv(cx) {
                    return Poll::Ready(*sig);
                }
            }
            Poll::Pending
        })
        .await
    }
}

/// A running forwarder bound to one phase command.
pub struct ForwarderHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<SignalForwarder>,
}

impl ForwarderHandle {
    /// Stop forwarding and take the receivers back for the next phase.
    ///
    /// Returns `None` if the forwarding task failed; the receivers are lost
    /// with it.
    pub async fn detach(self) -> Option<SignalForwarder> {
        let _ = self.stop_tx.send(());
        match self.task.await {
            Ok(forwarder) => Some(forwarder),
            Err(e) => {
                warn!(error = %e, "Signal forwarder task failed");
                None
            }
        }
    }
}
