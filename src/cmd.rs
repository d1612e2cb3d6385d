use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{DeployError, DeployResult};

const REDACTED: &str = "***";

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct Output {
    pub stdout: String,
    pub stderr: String,
}

/// A command line plus the context it runs in.
///
/// The child is started in its own process group so a timeout can
/// take down everything it spawned (`npm` forks freely).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rampa::cmd::Cmd;
///
/// let cmd = Cmd::new("npm")
///     .args(["run", "build"])
///     .timeout(Duration::from_secs(600));
///
/// assert_eq!(cmd.display(), "npm run build");
/// ```
#[derive(Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    secret_args: Vec<usize>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl Cmd {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            secret_args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    /// Build a command from whitespace-separated words. Returns
    /// `None` for a blank line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).args(words))
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// An argument that is passed to the child but never shown. It
    /// reads as `***` in [`Cmd::display`], logs and errors, and is
    /// masked out of captured output on failure.
    #[must_use]
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The command line as it would be typed in a shell.
    #[must_use]
    pub fn display(&self) -> String {
        let shown: Vec<String> = self
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                if self.secret_args.contains(&i) {
                    REDACTED.to_string()
                } else {
                    arg.clone()
                }
            })
            .collect();
        format_command(&self.program, &shown)
    }

    fn redact(&self, text: &str) -> String {
        self.secret_args
            .iter()
            .filter_map(|&i| self.args.get(i))
            .filter(|secret| !secret.is_empty())
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    /// Run the command to completion and capture its output. Fails if
    /// the program is missing, exits non-zero, or outlives the timeout.
    pub async fn output(&self) -> DeployResult<Output> {
        let command_line = self.display();
        let mut child = self.spawn()?;
        debug!(command = %command_line, "spawned");

        if let (Some(data), Some(mut pipe)) = (self.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                pipe.write_all(&data).await.ok();
            });
        }

        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status = match self.timeout {
            Some(limit) => {
                if let Ok(status) = tokio::time::timeout(limit, child.wait()).await {
                    status?
                } else {
                    warn!(
                        command = %command_line,
                        ?limit,
                        "command timed out, killing process group"
                    );
                    kill_tree(&mut child).await;
                    return Err(DeployError::CommandTimeout {
                        command: command_line,
                        limit,
                    });
                }
            }
            None => child.wait().await?,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(Output { stdout, stderr })
        } else {
            let (stdout, stderr) = (self.redact(&stdout), self.redact(&stderr));
            let code = status.code();
            debug!(command = %command_line, ?code, stderr = %stderr, "command failed");
            Err(DeployError::CommandFailed {
                command: command_line,
                code,
                stderr: failure_detail(&stdout, &stderr, code),
            })
        }
    }

    fn spawn(&self) -> DeployResult<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeployError::CommandNotFound(self.program.clone())
            } else {
                DeployError::Io(e)
            }
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await.ok();
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        kill_group(pid);
    }
    child.kill().await.ok();
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Ok(raw) = i32::try_from(pid) {
        killpg(Pid::from_raw(raw), Signal::SIGKILL).ok();
    }
}

#[cfg(not(unix))]
const fn kill_group(_pid: u32) {}

fn failure_detail(stdout: &str, stderr: &str, code: Option<i32>) -> String {
    if !stderr.is_empty() {
        stderr.to_string()
    } else if !stdout.is_empty() {
        stdout.to_string()
    } else {
        code.map_or_else(
            || "terminated by signal".to_string(),
            |c| format!("exit code {c}"),
        )
    }
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("command", &self.display())
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn format_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}
