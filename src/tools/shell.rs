use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::CancelSignal;
use serde::Deserialize;
use serde_json::Value;
use wait_timeout::ChildExt;

use crate::config::AgentConfig;
use crate::error::AgentError;

use super::confirm::ConfirmCategory;
use super::gate::{is_high_risk_command, sanitize_for_logging, CommandGate};
use super::rate_limit::RateLimiter;
use super::workspace::Workspace;
use super::{parse_args, ToolAccess, ToolContext, ToolHandler};

pub const BASH_TOOL_NAME: &str = "bash";
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100 * 1024;

const WAIT_SLICE: Duration = Duration::from_millis(50);
/// How long pipes may keep draining after the command itself has ended.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(200);
const PIPE_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BashArgs {
    command: String,
}

/// How a spawned command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellOutcome {
    Exited { status: String, success: bool },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub outcome: ShellOutcome,
    pub content: String,
}

/// Runs `bash -c` commands in the session working directory.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    workspace: Workspace,
    cwd: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self {
            cwd: workspace.root().to_path_buf(),
            workspace,
            timeout,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Moves the session working directory; the target must stay inside the
    /// workspace.
    pub fn change_directory(&mut self, target: &str) -> Result<String, AgentError> {
        let target = target.trim();
        let destination = if target.is_empty() {
            self.workspace.root().to_path_buf()
        } else {
            self.workspace
                .resolve_existing(self.cwd.join(target))
                .map_err(|error| AgentError::execution(BASH_TOOL_NAME, error))?
        };

        if !destination.is_dir() {
            return Err(AgentError::execution(
                BASH_TOOL_NAME,
                format!("cd: not a directory: {target}"),
            ));
        }

        self.cwd = destination;
        tracing::debug!(cwd = %self.cwd.display(), "session working directory changed");
        Ok(format!(
            "Changed directory to {}",
            self.workspace.relative_display(&self.cwd)
        ))
    }

    /// Spawns `command` in its own process group and waits for it, killing
    /// the whole group on timeout or when `cancel` is raised.
    pub fn run(&self, command: &str, cancel: &CancelSignal) -> Result<ShellOutput, AgentError> {
        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|error| {
                AgentError::execution(
                    BASH_TOOL_NAME,
                    format!("Failed to launch bash command: {error}"),
                )
            })?;

        let stdout = spawn_pipe_reader(child.stdout.take());
        let stderr = spawn_pipe_reader(child.stderr.take());

        let started = Instant::now();
        let outcome = loop {
            if cancel.load(Ordering::SeqCst) {
                kill_process_group(&mut child);
                return Err(AgentError::Aborted);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                kill_process_group(&mut child);
                break ShellOutcome::TimedOut;
            }

            match child.wait_timeout((self.timeout - elapsed).min(WAIT_SLICE)) {
                Ok(Some(status)) => {
                    break ShellOutcome::Exited {
                        status: format_exit_status(status),
                        success: status.success(),
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    kill_process_group(&mut child);
                    return Err(AgentError::execution(
                        BASH_TOOL_NAME,
                        format!("Failed waiting for bash command: {error}"),
                    ));
                }
            }
        };

        // Background jobs may still hold the pipes open.
        let drain_deadline = Instant::now() + PIPE_DRAIN_GRACE;
        let stdout = stdout.collect(drain_deadline);
        let stderr = stderr.collect(drain_deadline);

        let status_label = match &outcome {
            ShellOutcome::Exited { status, .. } => status.clone(),
            ShellOutcome::TimedOut => format!("timeout after {}ms", self.timeout.as_millis()),
        };
        let content = truncate_to_byte_limit(
            format!(
                "status: {status_label}\nstdout:\n{}\nstderr:\n{}",
                String::from_utf8_lossy(&stdout),
                String::from_utf8_lossy(&stderr)
            ),
            self.max_output_bytes,
        );

        Ok(ShellOutput { outcome, content })
    }
}

/// Returns the target of a plain `cd` command, or `None` for anything that
/// must run in a real shell.
pub fn parse_change_directory(command: &str) -> Option<&str> {
    let trimmed = command.trim();
    let rest = if trimmed == "cd" {
        ""
    } else {
        trimmed.strip_prefix("cd ")?
    };

    if rest
        .chars()
        .any(|ch| matches!(ch, ';' | '&' | '|' | '>' | '<' | '`' | '$' | '\n'))
    {
        return None;
    }

    let rest = rest.trim();
    let unquoted = rest
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .or_else(|| {
            rest.strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
        })
        .unwrap_or(rest);
    Some(unquoted)
}

/// The `bash` tool: gate, rate limit, confirmation, then execution.
pub struct BashTool {
    gate: CommandGate,
    limiter: RateLimiter,
    runner: ShellRunner,
}

impl BashTool {
    pub fn new(gate: CommandGate, limiter: RateLimiter, runner: ShellRunner) -> Self {
        Self {
            gate,
            limiter,
            runner,
        }
    }

    pub fn from_config(workspace: Workspace, config: &AgentConfig) -> Self {
        Self::new(
            CommandGate::new(),
            RateLimiter::new(config.rate_limit_max, config.rate_limit_window),
            ShellRunner::new(workspace, config.shell_timeout),
        )
    }

    pub fn runner(&self) -> &ShellRunner {
        &self.runner
    }
}

impl ToolHandler for BashTool {
    fn name(&self) -> &'static str {
        BASH_TOOL_NAME
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Write
    }

    fn validate_args(&self, args: &Value) -> Result<(), AgentError> {
        parse_args::<BashArgs>(args.clone()).map(|_| ())
    }

    fn execute(&mut self, args: Value, ctx: &ToolContext<'_>) -> Result<String, AgentError> {
        let BashArgs { command } = parse_args(args)?;
        let shown = sanitize_for_logging(&command);

        self.gate.validate(&command).into_result()?;
        self.limiter.can_execute(&command).into_result()?;
        ctx.confirm(
            ConfirmCategory::ShellCommands,
            "Run bash command",
            shown.clone(),
            is_high_risk_command(&command),
        )?;

        if let Some(target) = parse_change_directory(&command) {
            return self.runner.change_directory(target);
        }

        tracing::info!(command = %shown, cwd = %self.runner.cwd().display(), "running shell command");
        let output = self.runner.run(&command, ctx.cancel)?;
        match output.outcome {
            ShellOutcome::Exited { success: true, .. } => Ok(output.content),
            ShellOutcome::Exited { .. } => {
                Err(AgentError::execution(BASH_TOOL_NAME, output.content))
            }
            ShellOutcome::TimedOut => Err(AgentError::execution(
                BASH_TOOL_NAME,
                format!(
                    "Command timed out after {}ms\n{}",
                    self.runner.timeout.as_millis(),
                    output.content
                ),
            )),
        }
    }
}

/// Sends SIGKILL to the child's process group, then reaps the child.
fn kill_process_group(child: &mut Child) {
    let result = unsafe { libc::killpg(child.id() as libc::pid_t, libc::SIGKILL) };
    if result != 0 {
        tracing::debug!(
            pid = child.id(),
            error = %std::io::Error::last_os_error(),
            "killpg failed; killing shell only"
        );
        let _ = child.kill();
    }
    let _ = child.wait();
}

/// Pipe output collected on a reader thread.
///
/// Bytes are shared as they arrive so a caller that stops waiting still gets
/// everything read so far.
struct PipeReader {
    bytes: Arc<Mutex<Vec<u8>>>,
    finished: Receiver<()>,
}

impl PipeReader {
    fn collect(self, deadline: Instant) -> Vec<u8> {
        let _ = self
            .finished
            .recv_timeout(deadline.saturating_duration_since(Instant::now()));
        std::mem::take(&mut *lock_bytes(&self.bytes))
    }
}

fn spawn_pipe_reader(pipe: Option<impl Read + Send + 'static>) -> PipeReader {
    let bytes = Arc::new(Mutex::new(Vec::new()));
    let (done, finished) = mpsc::channel();
    let sink = Arc::clone(&bytes);
    thread::spawn(move || {
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; PIPE_CHUNK_BYTES];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => lock_bytes(&sink).extend_from_slice(&chunk[..read]),
                }
            }
        }
        let _ = done.send(());
    });

    PipeReader { bytes, finished }
}

fn lock_bytes(bytes: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    match bytes.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes.min(content.len());
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
