//! Helpers for driving the agent-init binary from tests.

#![allow(dead_code)]

use libc::c_int;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn init_command(args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_agent-init"));
    cmd.args(args)
        .env_remove("AGENT_INIT_PRE")
        .env_remove("AGENT_INIT_MAIN")
        .env_remove("AGENT_INIT_POST")
        .env("RUST_LOG", "debug");
    cmd
}

/// Run agent-init to completion and capture its output.
pub fn run_init(args: &[&str]) -> Output {
    init_command(args)
        .output()
        .expect("failed to run agent-init")
}

/// Build a `--pre/--main/--post` argument list, leaving out empty phases.
pub fn phase_args<'a>(pre: &'a str, main: &'a str, post: &'a str) -> Vec<&'a str> {
    let mut args = Vec::new();
    for (flag, value) in [("--pre", pre), ("--main", main), ("--post", post)] {
        if !value.is_empty() {
            args.push(flag);
            args.push(value);
        }
    }
    args
}

/// Write an executable-by-sh script and return the command line running it.
pub fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    format!("sh {}", path.display())
}

/// Wait until `cond` holds, or timeout.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Handle to a running agent-init process.
pub struct InitHandle {
    child: Child,
    log_lines: Arc<Mutex<Vec<String>>>,
    stderr_thread: Option<std::thread::JoinHandle<()>>,
}

impl InitHandle {
    /// Start agent-init with the given arguments, collecting its log output.
    pub fn start(args: &[&str]) -> Self {
        let mut child = init_command(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start agent-init");

        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let lines = Arc::clone(&log_lines);

        let stderr_thread = std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        eprintln!("[agent-init] {l}");
                        lines.lock().unwrap().push(l);
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            child,
            log_lines,
            stderr_thread: Some(stderr_thread),
        }
    }

    pub fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        wait_until(timeout, || self.has_log(pattern))
    }

    /// Wait until a single log line contains every pattern, or timeout.
    pub fn wait_for_line(&self, patterns: &[&str], timeout: Duration) -> bool {
        wait_until(timeout, || {
            let lines = self.log_lines.lock().unwrap();
            lines
                .iter()
                .any(|l| patterns.iter().all(|p| l.contains(p)))
        })
    }

    pub fn has_log(&self, pattern: &str) -> bool {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().any(|l| l.contains(pattern))
    }

    /// Index of the first log line containing `pattern`.
    pub fn log_position(&self, pattern: &str) -> Option<usize> {
        let lines = self.log_lines.lock().unwrap();
        lines.iter().position(|l| l.contains(pattern))
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send a signal to the agent-init process.
    pub fn send_signal(&self, sig: Signal) {
        signal::kill(self.pid(), sig).expect("failed to send signal to agent-init");
    }

    /// Send a signal by number, for signals nix cannot name (real-time range).
    pub fn send_raw_signal(&self, sig: c_int) {
        let rc = unsafe { libc::kill(self.pid().as_raw(), sig) };
        assert_eq!(rc, 0, "failed to send signal {sig} to agent-init");
    }

    /// Wait for agent-init to exit within the given timeout; kills it on timeout.
    ///
    /// On a clean exit the full log is collected before returning.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> Option<std::process::ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait().expect("failed to check agent-init status") {
                Some(status) => {
                    if let Some(thread) = self.stderr_thread.take() {
                        thread.join().ok();
                    }
                    return Some(status);
                }
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        self.child.wait().ok();
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl Drop for InitHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
