//! Task lifecycle collaborators driven through the command channel.
//!
//! The pipeline treats `setup`, `teardown`, `solve`, and `grade` as opaque
//! external calls. Failures come back as [`LifecycleOutcome`] values so the
//! calling phase can turn them into findings; `Err` is reserved for channel
//! unreachability.

use crate::exec::{truncate_utf8, ChannelError, CommandChannel, CommandOutput};
use crate::schema::Task;
use std::time::Duration;

const MAX_LIFECYCLE_OUTPUT: usize = 2048;

/// Result of one lifecycle operation.
#[derive(Debug, Clone)]
pub struct LifecycleOutcome {
    /// Rendered command line, suitable for repro steps.
    pub command: String,
    pub success: bool,
    pub timed_out: bool,
    pub duration_ms: u64,
    /// Merged stdout/stderr, bounded.
    pub output: String,
}

impl LifecycleOutcome {
    pub fn succeeded(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            success: true,
            timed_out: false,
            duration_ms: 0,
            output: String::new(),
        }
    }

    pub fn failed(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            success: false,
            timed_out: false,
            duration_ms: 0,
            output: output.into(),
        }
    }

    pub fn from_command(command: String, output: &CommandOutput) -> Self {
        Self {
            command,
            success: output.success(),
            timed_out: output.timed_out,
            duration_ms: output.duration_ms,
            output: merge_streams(output),
        }
    }
}

/// Raw grading output for score extraction.
#[derive(Debug, Clone)]
pub struct GradeOutput {
    pub command: String,
    pub raw_output: String,
    pub timed_out: bool,
}

/// Caller-supplied task lifecycle. Implementations issue one or more channel
/// commands per operation; this crate never interprets the workload itself.
/// The timeout is chosen per call: phases clamp it to their remaining budget.
pub trait TaskLifecycle {
    fn setup(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError>;
    fn teardown(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError>;
    /// Apply the task's known-correct reference artifacts.
    fn solve(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError>;
    fn grade(&self, task: &Task, timeout: Duration) -> Result<GradeOutput, ChannelError>;
    /// Tear down whatever task is currently active in the task's lesson
    /// scope, active or not.
    fn force_teardown_lesson(
        &self,
        task: &Task,
        timeout: Duration,
    ) -> Result<LifecycleOutcome, ChannelError>;
}

/// Default lifecycle glue: shells a course CLI (`lab start <id>`,
/// `lab finish <id>`, ...) through the command channel.
pub struct LabCommand<'a> {
    channel: &'a dyn CommandChannel,
    program: String,
}

impl<'a> LabCommand<'a> {
    pub fn new(channel: &'a dyn CommandChannel, program: impl Into<String>) -> Self {
        Self {
            channel,
            program: program.into(),
        }
    }

    fn render(&self, verb: &str, arg: Option<&str>) -> String {
        let mut words = vec![self.program.as_str(), verb];
        if let Some(arg) = arg {
            words.push(arg);
        }
        shell_words::join(words)
    }

    fn run(
        &self,
        verb: &str,
        arg: Option<&str>,
        timeout: Duration,
    ) -> Result<LifecycleOutcome, ChannelError> {
        let command = self.render(verb, arg);
        let output = self.channel.execute(&command, timeout)?;
        Ok(LifecycleOutcome::from_command(command, &output))
    }
}

impl TaskLifecycle for LabCommand<'_> {
    fn setup(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError> {
        self.run("start", Some(&task.id), timeout)
    }

    fn teardown(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError> {
        self.run("finish", Some(&task.id), timeout)
    }

    fn solve(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError> {
        self.run("solve", Some(&task.id), timeout)
    }

    fn grade(&self, task: &Task, timeout: Duration) -> Result<GradeOutput, ChannelError> {
        let command = self.render("grade", Some(&task.id));
        let output = self.channel.execute(&command, timeout)?;
        let mut raw_output = output.stdout.clone();
        if !output.stderr.is_empty() {
            if !raw_output.is_empty() {
                raw_output.push('\n');
            }
            raw_output.push_str(&output.stderr);
        }
        Ok(GradeOutput {
            command,
            raw_output,
            timed_out: output.timed_out,
        })
    }

    fn force_teardown_lesson(
        &self,
        task: &Task,
        timeout: Duration,
    ) -> Result<LifecycleOutcome, ChannelError> {
        let _ = task;
        // Bare `finish` closes whatever is active in the current lesson.
        self.run("finish", None, timeout)
    }
}

fn merge_streams(output: &CommandOutput) -> String {
    let mut merged = output.stdout.trim_end().to_string();
    let stderr = output.stderr.trim_end();
    if !stderr.is_empty() {
        if !merged.is_empty() {
            merged.push('\n');
        }
        merged.push_str(stderr);
    }
    truncate_utf8(&merged, MAX_LIFECYCLE_OUTPUT).to_string()
}
