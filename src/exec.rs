//! Command channel abstraction and the local shell implementation.
//!
//! Every command is a blocking call with an explicit timeout. Nonzero exit
//! codes and timeouts are ordinary values (`CommandOutput`), never errors;
//! the only error a channel may raise is [`ChannelError::Unreachable`], and
//! only when the channel itself cannot be used at all.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("environment unreachable: {reason}")]
    Unreachable { reason: String },
}

/// Result of one command execution. A timed-out command is reported in-band
/// so callers can tag findings with a distinct timeout reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            format!("exit code {}", self.exit_code)
        }
    }
}

/// Synchronous command channel into one environment. One logical shell
/// session; the pipeline never issues two commands concurrently against the
/// same channel.
pub trait CommandChannel {
    fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ChannelError>;
}

/// Channel that runs commands through a local POSIX shell. Mostly useful for
/// container-image checks and the test suite; remote transports implement
/// [`CommandChannel`] on the caller's side.
pub struct LocalShell {
    shell: PathBuf,
}

impl LocalShell {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

impl CommandChannel for LocalShell {
    fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ChannelError> {
        let start = Instant::now();
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ChannelError::Unreachable {
                reason: format!("spawn {}: {err}", self.shell.display()),
            })?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let deadline = start + timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        timed_out = true;
                        let _ = child.kill();
                        let _ = child.wait();
                        break None;
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
                Err(err) => {
                    return Err(ChannelError::Unreachable {
                        reason: format!("wait for child: {err}"),
                    })
                }
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        let exit_code = match status {
            Some(status) => status.code().unwrap_or(-1),
            None => -1,
        };
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<String>> {
    stream.map(|mut stream| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Truncate on a char boundary so snippets stay valid UTF-8.
pub(crate) fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_utf8_respects_char_boundaries() {
        let text = "ab\u{00e9}cd";
        assert_eq!(truncate_utf8(text, 3), "ab");
        assert_eq!(truncate_utf8(text, 4), "ab\u{00e9}");
        assert_eq!(truncate_utf8(text, 64), text);
    }

    #[test]
    fn failure_reason_distinguishes_timeout_from_exit_code() {
        let failed = CommandOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            duration_ms: 5,
        };
        assert_eq!(failed.failure_reason(), "exit code 2");

        let expired = CommandOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
            duration_ms: 100,
        };
        assert!(expired.failure_reason().contains("timed out"));
        assert!(!expired.success());
    }

    #[cfg(unix)]
    #[test]
    fn local_shell_captures_output_and_exit_code() {
        let shell = LocalShell::new("sh");
        let output = shell
            .execute("printf hello; printf oops >&2; exit 3", Duration::from_secs(5))
            .expect("execute");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn local_shell_kills_on_timeout() {
        let shell = LocalShell::new("sh");
        let output = shell
            .execute("sleep 5", Duration::from_millis(100))
            .expect("execute");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn local_shell_reports_unreachable_on_bad_shell() {
        let shell = LocalShell::new("/nonexistent/shell-for-test");
        let err = shell
            .execute("true", Duration::from_secs(1))
            .expect_err("spawn must fail");
        assert!(matches!(err, ChannelError::Unreachable { .. }));
    }
}
