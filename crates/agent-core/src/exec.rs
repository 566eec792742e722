//! Command Execution
//!
//! Runs a shell command with optional stdin and a timeout. The caller always
//! gets exactly one outcome back: the process finished, it was killed on
//! timeout, or it could not be spawned/read/waited on.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::tool::ToolResult;

/// Default timeout in milliseconds (2 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Maximum combined output kept before truncation (bytes)
pub const MAX_OUTPUT_BYTES: usize = 30_000;

/// Separator placed between stdout and stderr when both are present
pub const STDERR_SEPARATOR: &str = "\n--- stderr ---\n";

/// How long to keep reading the pipes once the shell has exited
const PIPE_DRAIN: Duration = Duration::from_millis(100);

/// What to run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Shell command line
    pub command: String,

    /// Text written to the process's stdin, which is then closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,

    /// Per-call timeout overriding the executor default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
            timeout_ms: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Executor settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Timeout used when a request does not set one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Output size cap
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,

    /// Working directory for spawned commands (inherits when unset)
    #[serde(default)]
    pub workdir: Option<std::path::PathBuf>,
}

fn default_timeout_ms() -> u64 { DEFAULT_TIMEOUT_MS }
fn default_max_output() -> usize { MAX_OUTPUT_BYTES }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output(),
            workdir: None,
        }
    }
}

/// Runs shell commands for tools
#[derive(Clone, Debug, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `command` through the platform shell.
    pub async fn execute(
        &self,
        command: &str,
        timeout_ms: Option<u64>,
        stdin: Option<&str>,
    ) -> ToolResult {
        let request = CommandRequest {
            command: command.to_string(),
            stdin: stdin.map(str::to_string),
            timeout_ms,
        };
        self.run(&request).await
    }

    /// Run a prepared request
    pub async fn run(&self, request: &CommandRequest) -> ToolResult {
        if request.command.trim().is_empty() {
            return ToolResult::failure("command cannot be empty");
        }

        let timeout_ms = request.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let started = Instant::now();

        let mut command = shell_command(&request.command);
        command
            .stdin(if request.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout takes down everything the shell started.
        #[cfg(unix)]
        {
            command.process_group(0);
        }
        if let Some(dir) = &self.config.workdir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = %request.command, error = %e, "failed to spawn command");
                return ToolResult::failure(format!("failed to spawn command: {}", e));
            }
        };

        let stdin_pipe = child.stdin.take();
        let input = request.stdin.clone();
        let feed = async move {
            if let (Some(mut pipe), Some(input)) = (stdin_pipe, input) {
                match pipe.write_all(input.as_bytes()).await {
                    Ok(()) => {}
                    // The process may exit without reading its input.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                    Err(e) => return Err(e),
                }
                // Dropping the pipe closes it so the child sees EOF.
                drop(pipe);
            }
            Ok(())
        };

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let exchange = async {
            let reading = async {
                let (out, err) = tokio::join!(
                    read_into(stdout_pipe.as_mut(), &mut stdout),
                    read_into(stderr_pipe.as_mut(), &mut stderr)
                );
                out.and(err)
            };
            let waiting = async {
                let (fed, status) = tokio::join!(feed, child.wait());
                fed.and(status)
            };
            tokio::pin!(reading);
            tokio::pin!(waiting);

            // The exit status decides the outcome, not pipe EOF: a background
            // grandchild may hold the pipes open long after the shell is gone.
            let mut read_result = None;
            let status = loop {
                tokio::select! {
                    status = &mut waiting => break status,
                    result = &mut reading, if read_result.is_none() => {
                        read_result = Some(result);
                    }
                }
            };
            if read_result.is_none() {
                read_result = tokio::time::timeout(PIPE_DRAIN, &mut reading).await.ok();
            }
            read_result.unwrap_or(Ok(()))?;
            status
        };

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), exchange).await;
        match outcome {
            Ok(Ok(status)) => {
                tracing::debug!(
                    command = %request.command,
                    status = %status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "command finished"
                );
                self.completed(status, &stdout, &stderr)
            }
            Ok(Err(e)) => {
                kill_process_tree(&mut child).await;
                tracing::warn!(
                    command = %request.command,
                    error = %e,
                    "failed to collect command output"
                );
                ToolResult::failure(format!("failed to read command output: {}", e))
            }
            Err(_) => {
                kill_process_tree(&mut child).await;
                tracing::warn!(command = %request.command, timeout_ms, "command timed out, killed");
                ToolResult::failure(format!(
                    "command timed out after {}ms and was killed",
                    timeout_ms
                ))
            }
        }
    }

    fn completed(&self, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> ToolResult {
        let combined = combine_output(
            &String::from_utf8_lossy(stdout),
            &String::from_utf8_lossy(stderr),
        );
        let combined = truncate_output(combined, self.config.max_output_bytes);

        match status.code() {
            Some(0) => ToolResult::success(combined),
            Some(code) => ToolResult::failure_with_output(format!("exit code {}", code), combined),
            None => ToolResult::failure_with_output("terminated by signal", combined),
        }
    }
}

/// Append everything `pipe` yields to `buf`. Bytes already read survive
/// the future being dropped.
async fn read_into<R>(pipe: Option<&mut R>, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// SIGKILL the child's whole process group, then the child itself.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pgid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                tracing::debug!(pgid, error = %e, "failed to kill process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "failed to kill command");
    }
}

fn shell_command(line: &str) -> Command {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    command.arg(line);
    command
}

/// Join stdout and stderr, separating them only when both have content
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (false, false) => format!("{}{}{}", stdout, STDERR_SEPARATOR, stderr),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (true, true) => String::new(),
    }
}

/// Cut `text` to at most `limit` bytes on a char boundary, noting the cut
pub fn truncate_output(text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n\n[output truncated: {} bytes total, showing first {}]",
        &text[..end],
        text.len(),
        end
    )
}
