//! Deadline-bounded subprocess execution.
//!
//! Commands are shell command lines (`sh -c` on Unix, `cmd /C` on Windows)
//! run with piped stdio. On Unix each child leads its own process group so a
//! timeout can take down anything the command forked, not just the shell.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default deadline when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to run one command.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// Shell command line.
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: HashMap<String, String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl ProcessRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: HashMap::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failures that prevent a [`ProcessOutput`] from being produced.
///
/// A non-zero exit code is not an error at this layer.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("process io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs external commands.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessSpawner`] backed by [`tokio::process`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProcessSpawner;

#[async_trait]
impl ProcessSpawner for NativeProcessSpawner {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessError> {
        let started = Instant::now();
        let mut cmd = shell_command(&request.command);
        cmd.envs(&request.env)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: request.command.clone(),
            source,
        })?;
        let mut group = GroupGuard(child.id());

        if let (Some(mut pipe), Some(input)) = (child.stdin.take(), request.stdin) {
            tokio::spawn(async move {
                // The child may exit without draining stdin; a broken pipe is fine.
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "stdin write ended early");
                }
            });
        }
        let stdout = child.stdout.take().map(|p| tokio::spawn(read_all(p)));
        let stderr = child.stderr.take().map(|p| tokio::spawn(read_all(p)));
        let aborts: Vec<_> = stdout
            .iter()
            .chain(stderr.iter())
            .map(|h| h.abort_handle())
            .collect();

        let waited = tokio::time::timeout(request.timeout, async {
            let status = child.wait().await?;
            let stdout = join_output(stdout).await;
            let stderr = join_output(stderr).await;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        match waited {
            Ok(result) => {
                let (status, stdout, stderr) = result?;
                group.disarm();
                let exit_code = status.code().unwrap_or(-1);
                debug!(
                    command = %request.command,
                    exit_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "process finished"
                );
                Ok(ProcessOutput {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            Err(_) => {
                terminate(&mut child).await;
                group.disarm();
                for handle in aborts {
                    handle.abort();
                }
                let timeout_ms = request.timeout.as_millis() as u64;
                warn!(command = %request.command, timeout_ms, "process killed after timeout");
                Err(ProcessError::Timeout {
                    command: request.command,
                    timeout_ms,
                })
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "output pipe read failed");
    }
    buf
}

async fn join_output(handle: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let bytes = match handle {
        Some(h) => h.await.unwrap_or_default(),
        None => Vec::new(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Kills the child's process group when a run is abandoned mid-flight,
/// such as when the future driving [`NativeProcessSpawner::run`] is dropped.
/// `kill_on_drop` alone only reaches the group leader.
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.0.take() {
            // SAFETY: see `terminate`; the group is still ours because the
            // leader has not been waited on.
            unsafe {
                libc::killpg(pid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal. The child was spawned with
        // process_group(0), so its pid is the id of a group we created.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill after timeout");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_captures_stdout() {
        let out = NativeProcessSpawner
            .run(ProcessRequest::new("echo hello world"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello world");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn stdin_is_written_and_closed() {
        let out = NativeProcessSpawner
            .run(ProcessRequest::new("cat").stdin("{\"a\":1}"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "{\"a\":1}");
    }

    #[tokio::test]
    async fn env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let out = NativeProcessSpawner
            .run(
                ProcessRequest::new("echo \"$GREETING\" && pwd")
                    .env("GREETING", "hi")
                    .cwd(dir.path()),
            )
            .await
            .unwrap();
        let mut lines = out.stdout.lines();
        assert_eq!(lines.next(), Some("hi"));
        let cwd = lines.next().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(std::path::Path::new(cwd).canonicalize().unwrap(), expected);
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let out = NativeProcessSpawner
            .run(ProcessRequest::new("echo oops >&2; exit 42"))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 42);
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn timeout_returns_promptly() {
        let started = Instant::now();
        let err = NativeProcessSpawner
            .run(ProcessRequest::new("sleep 60").timeout(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { timeout_ms: 300, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timed_out_process_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let command = format!("echo $$ > {}; sleep 30", pid_file.display());
        let err = NativeProcessSpawner
            .run(ProcessRequest::new(command).timeout(Duration::from_millis(500)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_dir = format!("/proc/{}", pid.trim());
        assert!(!std::path::Path::new(&proc_dir).exists());
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropped_run_kills_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let command = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let run = NativeProcessSpawner
            .run(ProcessRequest::new(command).timeout(Duration::from_secs(60)));
        assert!(
            tokio::time::timeout(Duration::from_millis(500), run)
                .await
                .is_err()
        );

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while is_running(pid.trim()) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!is_running(pid.trim()), "grandchild {pid} survived the drop");
    }
}
