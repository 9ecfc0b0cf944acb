//! Builder for executing external tool commands with timeout support.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept for error messages when stderr is
/// streamed through a callback.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). For streamed executions this
    /// holds only the trailing lines.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// Children are spawned with `kill_on_drop`, so a timed-out, cancelled, or
/// abandoned execution never leaves the process running.
///
/// # Example
///
/// ```no_run
/// use mf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> mf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("yt-dlp"))
///     .arg("-J")
///     .arg("--no-playlist")
///     .arg("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

enum Outcome {
    Finished(std::io::Result<(ExitStatus, Vec<u8>, String)>),
    TimedOut,
    Cancelled,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`mf_core::Error::Tool`] if the process times out (message
    ///   includes the timeout duration).
    /// - Returns [`mf_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes stderr).
    /// - Returns [`mf_core::Error::Tool`] if spawning the process fails.
    pub async fn execute(&self) -> mf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let child = self
            .command()
            .spawn()
            .map_err(|e| mf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                check_status(&program_name, tool_output)
            }
            Ok(Err(e)) => Err(mf_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(mf_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Execute the command, handing each stderr line to `on_line` as it is
    /// produced.
    ///
    /// Used for tools that report progress on stderr (`ffmpeg -progress
    /// pipe:2`). Stdout is still captured in full. When `cancel` fires the
    /// child is killed and a [`mf_core::Error::Tool`] is returned.
    pub async fn execute_with_stderr_callback<F>(
        &self,
        mut on_line: F,
        cancel: Option<CancellationToken>,
    ) -> mf_core::Result<ToolOutput>
    where
        F: FnMut(&str) + Send,
    {
        let program_name = self.program_name();
        let cancel = cancel.unwrap_or_else(CancellationToken::new);

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| mf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| mf_core::Error::tool(&program_name, "stderr was not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| mf_core::Error::tool(&program_name, "stdout was not captured"))?;

        let outcome = {
            let run = async {
                let read_stdout = async {
                    let mut buf = Vec::new();
                    stdout.read_to_end(&mut buf).await.map(|_| buf)
                };
                let read_stderr = async {
                    let mut lines = BufReader::new(stderr).lines();
                    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                    while let Some(line) = lines.next_line().await? {
                        on_line(&line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok::<_, std::io::Error>(Vec::from(tail).join("\n"))
                };
                let (out, err) = tokio::try_join!(read_stdout, read_stderr)?;
                let status = child.wait().await?;
                Ok::<_, std::io::Error>((status, out, err))
            };

            tokio::select! {
                res = run => Outcome::Finished(res),
                _ = tokio::time::sleep(self.timeout) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Finished(Ok((status, out, err))) => check_status(
                &program_name,
                ToolOutput {
                    status,
                    stdout: String::from_utf8_lossy(&out).to_string(),
                    stderr: err,
                },
            ),
            Outcome::Finished(Err(e)) => Err(mf_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Outcome::TimedOut => {
                let _ = child.kill().await;
                Err(mf_core::Error::tool(
                    program_name,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                Err(mf_core::Error::tool(program_name, "cancelled"))
            }
        }
    }
}

fn check_status(program_name: &str, output: ToolOutput) -> mf_core::Result<ToolOutput> {
    if !output.status.success() {
        return Err(mf_core::Error::tool(
            program_name,
            format!(
                "exited with status {}: {}",
                output.status,
                output.stderr.trim()
            ),
        ));
    }
    Ok(output)
}
