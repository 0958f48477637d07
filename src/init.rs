//! Init core - phase sequencing and the exit code.

use crate::command::{CommandSpec, Phase};
use crate::error::{Error, Result};
use crate::process::{CommandRunner, ProcessTable, RunOutcome};
use crate::reaper::{register_subreaper, ZombieReaper, DEFAULT_REAP_INTERVAL};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Init configuration.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// Command run before main; a failure aborts everything
    pub pre_start: Option<CommandSpec>,
    /// The command the container exists for
    pub main: CommandSpec,
    /// Command run after main, whatever main's outcome
    pub post_stop: Option<CommandSpec>,
    /// Idle time between reaper passes
    pub reap_interval: Duration,
    /// Whether to register as child subreaper when not PID 1
    pub subreaper: bool,
}

impl InitConfig {
    /// Build a configuration from raw command lines. Blank lines mean "not defined".
    pub fn from_command_lines(pre_start: &str, main: &str, post_stop: &str) -> Result<Self> {
        let main = CommandSpec::parse(main).map_err(|_| Error::MissingMainCommand)?;

        Ok(Self {
            pre_start: CommandSpec::parse_optional(pre_start),
            main,
            post_stop: CommandSpec::parse_optional(post_stop),
            reap_interval: DEFAULT_REAP_INTERVAL,
            subreaper: true,
        })
    }
}

/// Build metadata handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
}

impl BuildInfo {
    /// Version stamped at compile time through `AGENT_INIT_VERSION`, else the crate version.
    pub fn from_build_env() -> Self {
        Self {
            version: option_env!("AGENT_INIT_VERSION")
                .unwrap_or(env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }
}

/// Outcomes of the phases that actually ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorResult {
    pub pre_start: Option<RunOutcome>,
    pub main: Option<RunOutcome>,
    pub post_stop: Option<RunOutcome>,
}

impl SupervisorResult {
    /// Exit code of the init process: 0 or 1, never the child's own code.
    ///
    /// A failed pre-start or post-stop forces 1; otherwise main decides.
    pub fn exit_code(&self) -> u8 {
        let failed = |outcome: Option<RunOutcome>| outcome.is_some_and(|o| !o.success);

        if failed(self.pre_start) || failed(self.post_stop) {
            return 1;
        }
        match self.main {
            Some(outcome) if outcome.success => 0,
            _ => 1,
        }
    }
}

/// Runs pre-start, main and post-stop in order while reaping zombies.
pub struct Supervisor {
    config: InitConfig,
    build: BuildInfo,
    table: ProcessTable,
    runner: CommandRunner,
}

impl Supervisor {
    /// Create a supervisor.
    pub fn new(config: InitConfig, build: BuildInfo) -> Self {
        let table = ProcessTable::new();
        let runner = CommandRunner::new(table.clone());
        Self {
            config,
            build,
            table,
            runner,
        }
    }

    /// Build metadata this supervisor was created with.
    pub fn build_info(&self) -> &BuildInfo {
        &self.build
    }

    /// Run all phases. The reaper has fully stopped by the time this returns.
    pub async fn run(mut self) -> Result<SupervisorResult> {
        info!(version = %self.build.version, "agent-init starting");

        if self.config.subreaper && std::process::id() != 1 {
            match register_subreaper() {
                Ok(()) => debug!("Registered as child subreaper"),
                Err(e) => warn!(error = %e, "Failed to register as child subreaper"),
            }
        }

        self.runner.register_signals()?;
        let reaper = ZombieReaper::spawn(self.table.clone(), self.config.reap_interval)?;
        let result = self.run_phases().await;
        reaper.stop().await;

        info!(exit_code = result.exit_code(), "agent-init exiting");
        Ok(result)
    }

    async fn run_phases(&mut self) -> SupervisorResult {
        let Self { config, runner, .. } = self;
        let mut result = SupervisorResult::default();

        match &config.pre_start {
            None => info!("No pre-start command defined, skip"),
            Some(spec) => {
                let outcome = Self::run_phase(runner, Phase::PreStart, spec).await;
                result.pre_start = Some(outcome);
                if !outcome.success {
                    return result;
                }
            }
        }

        result.main = Some(Self::run_phase(runner, Phase::Main, &config.main).await);

        match &config.post_stop {
            None => info!("No post-stop command defined, skip"),
            Some(spec) => {
                result.post_stop = Some(Self::run_phase(runner, Phase::PostStop, spec).await);
            }
        }

        result
    }

    async fn run_phase(
        runner: &mut CommandRunner,
        phase: Phase,
        spec: &CommandSpec,
    ) -> RunOutcome {
        info!(phase = %phase, command = %spec, "{} command launched", phase);

        match runner.run(phase, spec).await {
            Ok(status) if status.success() => {
                info!(phase = %phase, "{} command exited", phase);
                RunOutcome::from(&status)
            }
            Ok(status) => {
                let outcome = RunOutcome::from(&status);
                let err = Error::CommandFailed { phase, status };
                error!(phase = %phase, error = %err, "{} command failed", phase);
                outcome
            }
            Err(e) => {
                error!(phase = %phase, error = %e, "{} command failed", phase);
                RunOutcome::NOT_STARTED
            }
        }
    }
}
