// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! CLI subprocess lifecycle
//!
//! [`ProcessInvoker::spawn`] starts one child per turn and hands back its
//! record stream together with a [`ProcessHandle`]. A supervisor task owns
//! the child: it enforces the idle and hard deadlines, escalates SIGTERM to
//! SIGKILL after the grace window and collects stderr, so the caller only
//! has to drain stdout and then await the handle.

use crate::config::{CliConfig, TimeoutConfig};
use crate::drainer::{ActivitySignal, EventDrainer};
use crate::env::sanitize_environment;
use crate::error::{BridgeError, BridgeResult, Deadline};
use crate::liveness::{default_probe, ChildProbe};
use crate::request::InvocationRequest;
use relay_logging::preview;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Bytes of stderr kept for error reporting
const STDERR_TAIL: usize = 64 * 1024;

/// Fully resolved command line for one child
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Complete child environment; nothing is inherited beyond this
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Starts a child process from a [`LaunchSpec`]
pub trait Spawner: Send + Sync {
    fn spawn(&self, spec: &LaunchSpec) -> BridgeResult<Child>;
}

/// Spawner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, spec: &LaunchSpec) -> BridgeResult<Child> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        // Own group so termination also reaches tool sub-processes
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::BinaryNotFound(spec.program.clone())
            } else {
                BridgeError::Spawn(e)
            }
        })
    }
}

/// Spawns the CLI and supervises it
#[derive(Clone)]
pub struct ProcessInvoker {
    cli: CliConfig,
    timeouts: TimeoutConfig,
    spawner: Arc<dyn Spawner>,
    probe: Arc<dyn ChildProbe>,
}

impl ProcessInvoker {
    pub fn new(cli: CliConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            cli,
            timeouts,
            spawner: Arc::new(TokioSpawner),
            probe: default_probe(),
        }
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ChildProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn cli(&self) -> &CliConfig {
        &self.cli
    }

    /// CLI arguments for `request`
    pub fn build_args(&self, request: &InvocationRequest) -> Vec<String> {
        let mut args = self.cli.extra_args.clone();
        args.extend(
            [
                "-p",
                request.prompt.as_str(),
                "--output-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages",
            ]
            .map(String::from),
        );

        if let Some(tools) = request.allowed_tools.as_ref().filter(|t| !t.is_empty()) {
            args.push("--allowedTools".into());
            args.push(tools.join(","));
        }
        if let Some(system_prompt) = &request.system_prompt {
            args.push("--append-system-prompt".into());
            args.push(system_prompt.clone());
        }
        if let Some(model) = &request.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        match (&request.resume_session, request.continue_latest) {
            (Some(session_id), _) => {
                args.push("--resume".into());
                args.push(session_id.clone());
            }
            (None, true) => args.push("--continue".into()),
            (None, false) => {}
        }
        if let Some(budget) = request.max_budget_usd {
            args.push("--max-budget-usd".into());
            args.push(budget.to_string());
        }
        args
    }

    /// Launch spec for `request` against the current process environment
    pub fn launch_spec(&self, request: &InvocationRequest) -> LaunchSpec {
        let base = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
        LaunchSpec {
            program: self.cli.binary.clone(),
            args: self.build_args(request),
            env: sanitize_environment(base, &self.cli.env_denylist),
            cwd: self.cli.working_dir.clone(),
        }
    }

    /// Start one turn
    pub fn spawn(&self, request: &InvocationRequest) -> BridgeResult<Invocation> {
        let spec = self.launch_spec(request);
        let mut child = self.spawner.spawn(&spec)?;
        let pid = child.id();

        info!(
            pid,
            binary = %spec.program,
            resume = ?request.resume_session,
            prompt = %preview(&request.prompt, 80),
            "Spawned CLI process"
        );

        let stdout = child.stdout.take().ok_or_else(|| {
            BridgeError::Spawn(std::io::Error::other("child stdout was not piped"))
        })?;
        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(collect_stderr(stderr, pid)));

        let activity = ActivitySignal::new();
        let events = EventDrainer::new(stdout, self.timeouts.settle()).with_activity(activity.clone());
        let supervisor = tokio::spawn(supervise(
            child,
            pid,
            activity,
            self.timeouts.clone(),
            Arc::clone(&self.probe),
            stderr_task,
        ));

        Ok(Invocation {
            events,
            handle: ProcessHandle { pid, supervisor },
        })
    }
}

/// A running turn: drain `events` to the end, then await `handle`
pub struct Invocation {
    pub events: EventDrainer<ChildStdout>,
    pub handle: ProcessHandle,
}

/// How the child ended
#[derive(Debug)]
pub struct ExitReport {
    /// `None` when the exit status could not be collected
    pub status: Option<ExitStatus>,
    pub stderr: String,
    /// Set when the supervisor terminated the child
    pub deadline: Option<Deadline>,
    pub elapsed: Duration,
}

impl ExitReport {
    /// Map the exit to the error taxonomy
    pub fn into_result(self) -> BridgeResult<Self> {
        if let Some(deadline) = self.deadline {
            return Err(BridgeError::Timeout {
                deadline,
                after: self.elapsed,
            });
        }
        let Some(status) = self.status else {
            return Err(BridgeError::Stream(std::io::Error::other(
                "exit status of CLI process unavailable",
            )));
        };
        if status.success() {
            return Ok(self);
        }

        let code = status.code().unwrap_or(-1);
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(BridgeError::SilentFailure { code })
        } else {
            Err(BridgeError::ProcessFailed {
                code,
                stderr: stderr.to_string(),
            })
        }
    }
}

/// Owner-side handle on the supervisor task
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    supervisor: JoinHandle<ExitReport>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for confirmed exit without classifying it
    pub async fn exit_report(self) -> BridgeResult<ExitReport> {
        self.supervisor
            .await
            .map_err(|e| BridgeError::Stream(std::io::Error::other(e)))
    }

    /// Wait for confirmed exit; non-zero exits and deadlines become errors
    pub async fn wait(self) -> BridgeResult<ExitReport> {
        self.exit_report().await?.into_result()
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    activity: ActivitySignal,
    timeouts: TimeoutConfig,
    probe: Arc<dyn ChildProbe>,
    stderr_task: Option<JoinHandle<String>>,
) -> ExitReport {
    let started = Instant::now();
    let idle = tokio::time::sleep(timeouts.idle());
    let hard = tokio::time::sleep(timeouts.hard());
    tokio::pin!(idle, hard);

    let mut liveness = tokio::time::interval_at(
        started + timeouts.liveness_interval(),
        timeouts.liveness_interval(),
    );
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut deadline = None;
    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status
                    .map_err(|e| warn!(pid, error = %e, "Failed to collect CLI exit status"))
                    .ok();
            }
            _ = activity.notified() => {
                idle.as_mut().reset(Instant::now() + timeouts.idle());
            }
            _ = liveness.tick() => {
                if let Some(pid) = pid {
                    if probe.has_live_children(pid).await {
                        trace!(pid, "Tool sub-process alive; idle deadline extended");
                        idle.as_mut().reset(Instant::now() + timeouts.idle());
                    }
                }
            }
            _ = &mut idle => {
                warn!(pid, idle = ?timeouts.idle(), "CLI idle deadline exceeded");
                deadline = Some(Deadline::Idle);
                break terminate(&mut child, pid, timeouts.kill_grace()).await;
            }
            _ = &mut hard => {
                warn!(pid, hard = ?timeouts.hard(), "CLI hard deadline exceeded");
                deadline = Some(Deadline::Hard);
                break terminate(&mut child, pid, timeouts.kill_grace()).await;
            }
        }
    };

    let stderr = match stderr_task {
        Some(task) => match tokio::time::timeout(timeouts.kill_grace(), task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                debug!(pid, error = %e, "stderr collector failed");
                String::new()
            }
            Err(_) => {
                debug!(pid, "stderr still open after exit; giving up on it");
                String::new()
            }
        },
        None => String::new(),
    };

    let elapsed = started.elapsed();
    debug!(pid, status = ?status, elapsed = ?elapsed, "CLI process exited");
    ExitReport {
        status,
        stderr,
        deadline,
        elapsed,
    }
}

/// SIGTERM the process group, SIGKILL it after `grace`
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    signal_group(child, pid, false);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            warn!(pid, grace = ?grace, "CLI ignored SIGTERM; killing");
            signal_group(child, pid, true);
            child.wait().await.ok()
        }
    }
}

#[cfg(unix)]
fn signal_group(child: &mut Child, pid: Option<u32>, force: bool) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let group = pid.and_then(|pid| i32::try_from(pid).ok());
    match group {
        Some(group) => {
            if let Err(e) = killpg(Pid::from_raw(group), signal) {
                debug!(pid = group, signal = %signal, error = %e, "killpg failed; signalling child only");
                if force {
                    let _ = child.start_kill();
                }
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _pid: Option<u32>, _force: bool) {
    let _ = child.start_kill();
}

async fn collect_stderr(stderr: ChildStderr, pid: Option<u32>) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(pid, line = %line, "CLI stderr");
                captured.push_str(&line);
                captured.push('\n');
                if captured.len() > STDERR_TAIL {
                    let mut cut = captured.len() - STDERR_TAIL;
                    while !captured.is_char_boundary(cut) {
                        cut += 1;
                    }
                    captured.drain(..cut);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(pid, error = %e, "Failed reading CLI stderr");
                break;
            }
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker() -> ProcessInvoker {
        ProcessInvoker::new(CliConfig::default(), TimeoutConfig::default())
    }

    #[test]
    fn minimal_argument_shape() {
        let args = invoker().build_args(&InvocationRequest::new("hello"));
        assert_eq!(
            args,
            vec![
                "-p",
                "hello",
                "--output-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages"
            ]
        );
    }

    #[test]
    fn full_argument_shape() {
        let request = InvocationRequest::new("hi")
            .allowed_tools(["Read", "Bash"])
            .system_prompt("be brief")
            .model("sonnet")
            .resume("sess-1")
            .continue_latest(true)
            .max_budget_usd(0.5);

        let args = invoker().build_args(&request);

        assert_eq!(
            args[6..],
            [
                "--allowedTools",
                "Read,Bash",
                "--append-system-prompt",
                "be brief",
                "--model",
                "sonnet",
                "--resume",
                "sess-1",
                "--max-budget-usd",
                "0.5"
            ]
        );
    }

    #[test]
    fn continue_without_resume() {
        let args = invoker().build_args(&InvocationRequest::new("hi").continue_latest(true));
        assert_eq!(args.last().map(String::as_str), Some("--continue"));
    }

    #[test]
    fn extra_args_come_first_and_empty_tool_list_is_omitted() {
        let cli = CliConfig {
            extra_args: vec!["--dangerously-skip-permissions".into()],
            ..Default::default()
        };
        let invoker = ProcessInvoker::new(cli, TimeoutConfig::default());

        let args = invoker.build_args(&InvocationRequest::new("hi").allowed_tools(Vec::<String>::new()));

        assert_eq!(args[0], "--dangerously-skip-permissions");
        assert!(!args.iter().any(|a| a == "--allowedTools"));
    }

    #[cfg(unix)]
    #[test]
    fn silent_and_loud_failures_are_distinguished() {
        use std::os::unix::process::ExitStatusExt;

        let report = |stderr: &str| ExitReport {
            status: Some(ExitStatus::from_raw(2 << 8)),
            stderr: stderr.to_string(),
            deadline: None,
            elapsed: Duration::ZERO,
        };

        assert!(matches!(
            report("  \n").into_result(),
            Err(BridgeError::SilentFailure { code: 2 })
        ));
        assert!(matches!(
            report("boom\n").into_result(),
            Err(BridgeError::ProcessFailed { code: 2, ref stderr }) if stderr == "boom"
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let cli = CliConfig {
            binary: "/nonexistent/relay-test-cli".into(),
            ..Default::default()
        };
        let invoker = ProcessInvoker::new(cli, TimeoutConfig::default());

        let result = invoker.spawn(&InvocationRequest::new("hi"));

        assert!(matches!(result, Err(BridgeError::BinaryNotFound(_))));
    }
}
