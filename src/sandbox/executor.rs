use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, error, warn};

use super::parser::{self, ParseError};

const KILL_GRACE: Duration = Duration::from_millis(1_000);
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{0}")]
    Injection(#[from] ParseError),

    #[error("command '{0}' is not in the allowed commands list")]
    CommandNotAllowed(String),

    #[error("command '{0}' not found")]
    CommandNotFound(String),

    #[error("failed to spawn '{0}': {1}")]
    SpawnError(String, String),

    #[error("command '{0}' timed out after {1:?}")]
    Timeout(String, Duration),
}

/// Result of one completed child process execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Sandbox configuration: the allow-list, the scrubbed base environment,
/// and resource bounds. `max_memory` is advisory only: it is recorded for
/// callers to report but is not enforced via cgroups or rlimits here, so
/// the actual process boundary is the allow-list, the scrubbed env, and
/// the timeout.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub allowed_commands: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
    pub cwd: Option<PathBuf>,
    pub max_memory: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            env: HashMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cwd: None,
            max_memory: None,
        }
    }
}

/// Parses, validates, spawns, and supervises one external command at a
/// time per call. Never invokes a shell: the parsed program and argv are
/// handed directly to the OS.
///
/// Live children are tracked by pid in `live`, not by the `Child` handle
/// itself — tokio reaps the OS process in the background once its
/// `Child` value is dropped, so a bare pid is enough to signal a process
/// that `execute()` is still waiting on from another task (`cleanup()`).
pub struct SandboxExecutor {
    config: SandboxConfig,
    live: DashMap<u64, u32>,
    next_id: AtomicU64,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            live: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Parse, allow-list check, spawn, and wait (with timeout) for
    /// `command_string`. `context` entries overlay the sandbox's base env
    /// and win on key collisions.
    pub async fn execute(
        &self,
        command_string: &str,
        context: &HashMap<String, String>,
    ) -> Result<ExecutionResult, SandboxError> {
        let command = parser::parse(command_string)?;

        if !self
            .config
            .allowed_commands
            .iter()
            .any(|allowed| allowed == &command.program)
        {
            return Err(SandboxError::CommandNotAllowed(command.program.clone()));
        }

        let env = self.build_env(context);
        debug!(program = %command.program, arg_count = command.args.len(), "spawning sandboxed command");

        let mut cmd = TokioCommand::new(&command.program);
        cmd.args(&command.args)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }
        hide_console_window(&mut cmd);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::CommandNotFound(command.program.clone())
            } else {
                SandboxError::SpawnError(command.program.clone(), e.to_string())
            }
        })?;

        let pid = child.id();
        let slot = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some(pid) = pid {
            self.live.insert(slot, pid);
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        self.live.remove(&slot);

        match result {
            Ok(Ok(output)) => Ok(ExecutionResult {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(1),
            }),
            Ok(Err(e)) => Err(SandboxError::SpawnError(command.program, e.to_string())),
            Err(_elapsed) => {
                warn!(program = %command.program, timeout_ms = self.config.timeout_ms, "command timed out");
                if let Some(pid) = pid {
                    terminate_then_kill(pid).await;
                }
                Err(SandboxError::Timeout(command.program, timeout))
            }
        }
    }

    /// Send a graceful terminate to every tracked live child and clear the
    /// live-set. Called during host shutdown.
    pub async fn cleanup(&self) {
        let pids: Vec<u32> = self.live.iter().map(|e| *e.value()).collect();
        self.live.clear();
        for pid in pids {
            send_signal(pid, Signal::Terminate);
        }
    }

    /// Assemble the sandbox env: base map, overlaid by caller context
    /// (caller wins), falling back to the host `PATH` and finally a
    /// hard-coded default if `PATH` is still unset.
    fn build_env(&self, context: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = self.config.env.clone();
        for (k, v) in context {
            env.insert(k.clone(), v.clone());
        }
        if !env.contains_key("PATH") {
            match std::env::var("PATH") {
                Ok(path) => {
                    env.insert("PATH".to_string(), path);
                }
                Err(_) => {
                    env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
                }
            }
        }
        env
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// Send `signal` to `pid`, best-effort: a process that already exited is
/// not an error worth surfacing here (it raced us).
fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal as NixSignal};
        use nix::unistd::Pid;

        let nix_signal = match signal {
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), nix_signal) {
            debug!(pid, signal = ?nix_signal, error = %e, "signal delivery failed (process likely already exited)");
        }
    }
    #[cfg(windows)]
    {
        // Windows has no SIGTERM equivalent; taskkill without /F requests a
        // graceful close, /F forces termination.
        let force = matches!(signal, Signal::Kill);
        let mut cmd = std::process::Command::new("taskkill");
        cmd.arg("/PID").arg(pid.to_string());
        if force {
            cmd.arg("/F");
        }
        if let Err(e) = cmd.status() {
            error!(pid, error = %e, "taskkill failed during sandbox termination");
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(windows)]
fn process_alive(_pid: u32) -> bool {
    // Best-effort only on Windows: without an extra dependency we cannot
    // cheaply probe liveness, so we always escalate to a forceful kill
    // after the grace window.
    true
}

/// Timeout escalation: graceful terminate, a 1000ms grace window, then a
/// forceful kill if the process is still alive.
async fn terminate_then_kill(pid: u32) {
    send_signal(pid, Signal::Terminate);
    tokio::time::sleep(KILL_GRACE).await;
    if process_alive(pid) {
        warn!(pid, "process survived grace window, sending forceful kill");
        send_signal(pid, Signal::Kill);
    }
}

#[cfg(windows)]
fn hide_console_window(cmd: &mut TokioCommand) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_cmd: &mut TokioCommand) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(cmds: &[&str]) -> SandboxConfig {
        SandboxConfig {
            allowed_commands: cmds.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            timeout_ms: 5_000,
            cwd: None,
            max_memory: None,
        }
    }

    #[tokio::test]
    async fn runs_allowed_command() {
        let executor = SandboxExecutor::new(allow(&["echo"]));
        let result = executor
            .execute("echo hello", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn rejects_disallowed_command() {
        let executor = SandboxExecutor::new(allow(&["echo"]));
        let err = executor.execute("whoami", &HashMap::new()).await;
        assert!(matches!(err, Err(SandboxError::CommandNotAllowed(_))));
    }

    #[tokio::test]
    async fn rejects_injection_without_spawning() {
        let executor = SandboxExecutor::new(allow(&["echo"]));
        let err = executor.execute("echo hi; rm -rf /", &HashMap::new()).await;
        assert!(matches!(err, Err(SandboxError::Injection(_))));
        let err = executor.execute("echo $(whoami)", &HashMap::new()).await;
        assert!(matches!(err, Err(SandboxError::Injection(_))));
    }

    #[tokio::test]
    async fn context_overlays_sandbox_env() {
        let mut base_env = HashMap::new();
        base_env.insert("FOO".to_string(), "base".to_string());
        let mut cfg = allow(&["env"]);
        cfg.env = base_env;
        let executor = SandboxExecutor::new(cfg);

        let mut context = HashMap::new();
        context.insert("FOO".to_string(), "overlaid".to_string());
        let result = executor.execute("env", &context).await.unwrap();
        assert!(result.stdout.contains("FOO=overlaid"));
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let mut cfg = allow(&["sleep"]);
        cfg.timeout_ms = 50;
        let executor = SandboxExecutor::new(cfg);
        let err = executor.execute("sleep 5", &HashMap::new()).await;
        assert!(matches!(err, Err(SandboxError::Timeout(_, _))));
    }
}
