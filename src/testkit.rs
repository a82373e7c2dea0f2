//! In-memory doubles for the command channel and task lifecycle.
//!
//! Used by the crate's own test suite; exposed so integration tests and
//! downstream callers can exercise the pipeline without a live environment.
//! Scripted queues are sticky: with one response left, it repeats forever.

use crate::exec::{ChannelError, CommandChannel, CommandOutput};
use crate::lifecycle::{GradeOutput, LifecycleOutcome, TaskLifecycle};
use crate::schema::Task;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        timed_out: false,
        duration_ms: 0,
    }
}

pub fn failed_output(exit_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
        timed_out: false,
        duration_ms: 0,
    }
}

pub fn timed_out_output(duration_ms: u64) -> CommandOutput {
    CommandOutput {
        exit_code: -1,
        stdout: String::new(),
        stderr: String::new(),
        timed_out: true,
        duration_ms,
    }
}

struct Rule {
    needle: String,
    queue: VecDeque<CommandOutput>,
}

/// Channel double that matches commands by substring. The first rule whose
/// needle appears in the command wins; unmatched commands succeed with empty
/// output.
#[derive(Default)]
pub struct ScriptedChannel {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for commands containing `needle`.
    pub fn on(&self, needle: &str, output: CommandOutput) {
        let mut rules = self.rules.lock().expect("rules lock");
        if let Some(rule) = rules.iter_mut().find(|rule| rule.needle == needle) {
            rule.queue.push_back(output);
        } else {
            rules.push(Rule {
                needle: needle.to_string(),
                queue: VecDeque::from([output]),
            });
        }
    }

    /// Every command executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }
}

impl CommandChannel for ScriptedChannel {
    fn execute(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, ChannelError> {
        self.log
            .lock()
            .expect("log lock")
            .push(command.to_string());
        let mut rules = self.rules.lock().expect("rules lock");
        for rule in rules.iter_mut() {
            if command.contains(&rule.needle) {
                let output = if rule.queue.len() > 1 {
                    rule.queue.pop_front()
                } else {
                    rule.queue.front().cloned()
                };
                return Ok(output.unwrap_or_else(|| ok_output("")));
            }
        }
        Ok(ok_output(""))
    }
}

/// Channel double whose every call reports the environment as unreachable.
#[derive(Default)]
pub struct UnreachableChannel;

impl CommandChannel for UnreachableChannel {
    fn execute(&self, _command: &str, _timeout: Duration) -> Result<CommandOutput, ChannelError> {
        Err(ChannelError::Unreachable {
            reason: "scripted outage".to_string(),
        })
    }
}

/// Lifecycle double with sticky per-operation outcome queues. Operations
/// with nothing queued succeed.
#[derive(Default)]
pub struct ScriptedLifecycle {
    setup: Mutex<VecDeque<LifecycleOutcome>>,
    teardown: Mutex<VecDeque<LifecycleOutcome>>,
    solve: Mutex<VecDeque<LifecycleOutcome>>,
    force: Mutex<VecDeque<LifecycleOutcome>>,
    grades: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_setup(&self, outcome: LifecycleOutcome) {
        self.setup.lock().expect("setup lock").push_back(outcome);
    }

    pub fn push_setup_failure(&self, message: &str) {
        self.push_setup(LifecycleOutcome::failed("lab start <task>", message));
    }

    pub fn push_teardown(&self, outcome: LifecycleOutcome) {
        self.teardown
            .lock()
            .expect("teardown lock")
            .push_back(outcome);
    }

    pub fn push_teardown_failure(&self, message: &str) {
        self.push_teardown(LifecycleOutcome::failed("lab finish <task>", message));
    }

    pub fn push_solve(&self, outcome: LifecycleOutcome) {
        self.solve.lock().expect("solve lock").push_back(outcome);
    }

    pub fn push_grade(&self, raw_output: &str) {
        self.grades
            .lock()
            .expect("grades lock")
            .push_back(raw_output.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Timeout received by each operation, in call order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().expect("timeouts lock").clone()
    }

    fn record(&self, operation: &str, task: &Task, timeout: Duration) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{operation}:{}", task.id));
        self.timeouts.lock().expect("timeouts lock").push(timeout);
    }

    fn pop(
        queue: &Mutex<VecDeque<LifecycleOutcome>>,
        default_command: &str,
    ) -> LifecycleOutcome {
        let mut queue = queue.lock().expect("queue lock");
        let outcome = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        outcome.unwrap_or_else(|| LifecycleOutcome::succeeded(default_command))
    }
}

impl TaskLifecycle for ScriptedLifecycle {
    fn setup(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError> {
        self.record("setup", task, timeout);
        Ok(Self::pop(&self.setup, "lab start <task>"))
    }

    fn teardown(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError> {
        self.record("teardown", task, timeout);
        Ok(Self::pop(&self.teardown, "lab finish <task>"))
    }

    fn solve(&self, task: &Task, timeout: Duration) -> Result<LifecycleOutcome, ChannelError> {
        self.record("solve", task, timeout);
        Ok(Self::pop(&self.solve, "lab solve <task>"))
    }

    fn grade(&self, task: &Task, timeout: Duration) -> Result<GradeOutput, ChannelError> {
        self.record("grade", task, timeout);
        let mut grades = self.grades.lock().expect("grades lock");
        let raw_output = if grades.len() > 1 {
            grades.pop_front()
        } else {
            grades.front().cloned()
        };
        Ok(GradeOutput {
            command: "lab grade <task>".to_string(),
            raw_output: raw_output.unwrap_or_default(),
            timed_out: false,
        })
    }

    fn force_teardown_lesson(
        &self,
        task: &Task,
        timeout: Duration,
    ) -> Result<LifecycleOutcome, ChannelError> {
        self.record("force_teardown", task, timeout);
        Ok(Self::pop(&self.force, "lab finish"))
    }
}
