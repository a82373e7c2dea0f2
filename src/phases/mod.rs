//! Verification phases and shared phase plumbing.
//!
//! Each phase is one named unit of verification. Phases record findings and
//! diagnostics through a [`PhaseContext`]; the only error they may return is
//! channel unreachability, which aborts the whole pipeline. Everything else
//! (command failures, timeouts, unparseable output) becomes a finding so one
//! broken check never hides the rest.

mod cleanup;
mod grading;
mod idempotency;
mod independence;
mod prerequisites;
mod syntax;
mod workload;

pub use cleanup::CleanupValidation;
pub use grading::GradingPolarity;
pub use idempotency::IdempotencyCycling;
pub use independence::CrossTaskIndependence;
pub use prerequisites::Prerequisites;
pub use syntax::CommandSyntax;
pub use workload::WorkloadExecution;

use crate::config::PipelineConfig;
use crate::exec::{ChannelError, CommandChannel, CommandOutput};
use crate::lifecycle::{GradeOutput, LifecycleOutcome, TaskLifecycle};
use crate::schema::{Finding, PhaseName, PhaseResult, Severity, Task};
use crate::snapshot::{self, StateSnapshot};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// A phase fails when any finding reaches this severity. Blocker findings
/// fail too since `Blocker > Critical`.
pub const PHASE_FAIL_THRESHOLD: Severity = Severity::Critical;

pub trait Phase {
    fn name(&self) -> PhaseName;
    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError>;
}

/// Per-invocation phase state: collaborators, the phase deadline, and the
/// accumulated findings and diagnostics. All command and lifecycle work goes
/// through this context so every call is clamped to the remaining phase
/// budget; an exhausted budget surfaces as a synthetic timed-out result,
/// matching the policy that timeouts are findings, not errors.
pub struct PhaseContext<'a> {
    channel: &'a dyn CommandChannel,
    lifecycle: &'a dyn TaskLifecycle,
    pub task: &'a Task,
    pub config: &'a PipelineConfig,
    phase: PhaseName,
    ids: &'a mut FindingIds,
    deadline: Instant,
    findings: Vec<Finding>,
    details: BTreeMap<String, String>,
}

impl PhaseContext<'_> {
    /// Remaining phase budget clamped to the per-command timeout; `None`
    /// once the deadline has passed.
    fn remaining_budget(&self) -> Option<Duration> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            None
        } else {
            Some(remaining.min(self.config.command_timeout()))
        }
    }

    fn budget_exhausted_outcome(&self, operation: &str) -> LifecycleOutcome {
        LifecycleOutcome {
            command: operation.to_string(),
            success: false,
            timed_out: true,
            duration_ms: 0,
            output: format!("phase {} budget exhausted", self.phase),
        }
    }

    /// Execute one command, clamped to both the per-command timeout and the
    /// remaining phase budget.
    pub fn execute(&self, command: &str) -> Result<CommandOutput, ChannelError> {
        let Some(timeout) = self.remaining_budget() else {
            return Ok(CommandOutput {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("phase {} budget exhausted", self.phase),
                timed_out: true,
                duration_ms: 0,
            });
        };
        self.channel.execute(command, timeout)
    }

    pub fn setup(&self) -> Result<LifecycleOutcome, ChannelError> {
        match self.remaining_budget() {
            Some(timeout) => self.lifecycle.setup(self.task, timeout),
            None => Ok(self.budget_exhausted_outcome("setup")),
        }
    }

    pub fn teardown(&self) -> Result<LifecycleOutcome, ChannelError> {
        match self.remaining_budget() {
            Some(timeout) => self.lifecycle.teardown(self.task, timeout),
            None => Ok(self.budget_exhausted_outcome("teardown")),
        }
    }

    pub fn solve(&self) -> Result<LifecycleOutcome, ChannelError> {
        match self.remaining_budget() {
            Some(timeout) => self.lifecycle.solve(self.task, timeout),
            None => Ok(self.budget_exhausted_outcome("solve")),
        }
    }

    pub fn grade(&self) -> Result<GradeOutput, ChannelError> {
        match self.remaining_budget() {
            Some(timeout) => self.lifecycle.grade(self.task, timeout),
            None => Ok(GradeOutput {
                command: "grade".to_string(),
                raw_output: String::new(),
                timed_out: true,
            }),
        }
    }

    pub fn force_teardown_lesson(&self) -> Result<LifecycleOutcome, ChannelError> {
        match self.remaining_budget() {
            Some(timeout) => self.lifecycle.force_teardown_lesson(self.task, timeout),
            None => Ok(self.budget_exhausted_outcome("force teardown")),
        }
    }

    /// Capture a snapshot and fold its warnings into the phase diagnostics.
    /// Listings are clamped to the phase deadline like everything else.
    pub fn capture(&mut self, label: &str) -> Result<StateSnapshot, ChannelError> {
        let snap = snapshot::capture(
            self.channel,
            &self.config.capture,
            &self.config.working_dirs,
            label,
            self.deadline,
        )?;
        for (idx, warning) in snap.warnings.iter().enumerate() {
            self.details
                .insert(format!("capture_warning.{label}.{idx}"), warning.clone());
        }
        Ok(snap)
    }

    pub fn finding(
        &mut self,
        severity: Severity,
        description: impl Into<String>,
        remediation: impl Into<String>,
        repro_steps: Vec<String>,
    ) {
        let finding = Finding {
            id: self.ids.next(self.phase),
            severity,
            category: self.phase,
            description: description.into(),
            remediation: remediation.into(),
            repro_steps,
        };
        tracing::debug!(
            id = %finding.id,
            severity = %finding.severity,
            description = %finding.description,
            "recorded finding"
        );
        self.findings.push(finding);
    }

    pub fn detail(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.details.insert(key.into(), value.into());
    }

    pub fn finding_count(&self) -> usize {
        self.findings.len()
    }
}

/// Allocates category-prefixed finding ids, unique per pipeline run.
#[derive(Debug, Default)]
pub struct FindingIds {
    counters: BTreeMap<PhaseName, u32>,
}

impl FindingIds {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, phase: PhaseName) -> String {
        let counter = self.counters.entry(phase).or_insert(0);
        *counter += 1;
        format!("{}-{:03}", phase.as_str(), counter)
    }
}

/// Run one phase to completion and assemble its result.
pub fn run_phase(
    phase: &dyn Phase,
    channel: &dyn CommandChannel,
    lifecycle: &dyn TaskLifecycle,
    task: &Task,
    config: &PipelineConfig,
    ids: &mut FindingIds,
) -> Result<PhaseResult, ChannelError> {
    let start = Instant::now();
    let mut ctx = PhaseContext {
        channel,
        lifecycle,
        task,
        config,
        phase: phase.name(),
        ids,
        deadline: start + config.phase_timeout(phase.name()),
        findings: Vec::new(),
        details: BTreeMap::new(),
    };
    phase.run(&mut ctx)?;
    let PhaseContext {
        findings, details, ..
    } = ctx;
    let passed = findings
        .iter()
        .all(|finding| finding.severity < PHASE_FAIL_THRESHOLD);
    Ok(PhaseResult {
        phase: phase.name(),
        passed,
        findings,
        duration_ms: start.elapsed().as_millis() as u64,
        details,
    })
}

/// Remediation text for a failed lifecycle operation; timeouts get advice to
/// raise the timeout instead of changing the task.
pub(crate) fn lifecycle_remediation(outcome: &LifecycleOutcome, default: &str) -> String {
    if outcome.timed_out {
        format!(
            "command timed out after {}ms; raise the configured timeout before changing the task",
            outcome.duration_ms
        )
    } else {
        default.to_string()
    }
}

/// Compact `(reason: output)` suffix for finding descriptions.
pub(crate) fn outcome_summary(outcome: &LifecycleOutcome) -> String {
    let reason = if outcome.timed_out {
        format!("timed out after {}ms", outcome.duration_ms)
    } else {
        "failed".to_string()
    };
    if outcome.output.is_empty() {
        reason
    } else {
        format!("{reason}: {}", outcome.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TaskKind;
    use crate::testkit::{ScriptedChannel, ScriptedLifecycle};

    fn task() -> Task {
        Task {
            id: "budget-lab".to_string(),
            kind: TaskKind::GradedLab,
            lesson_id: "budget".to_string(),
        }
    }

    fn context<'a>(
        channel: &'a ScriptedChannel,
        lifecycle: &'a ScriptedLifecycle,
        task: &'a Task,
        config: &'a PipelineConfig,
        ids: &'a mut FindingIds,
        deadline: Instant,
    ) -> PhaseContext<'a> {
        PhaseContext {
            channel,
            lifecycle,
            task,
            config,
            phase: PhaseName::WorkloadExecution,
            ids,
            deadline,
            findings: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    #[test]
    fn exhausted_budget_short_circuits_commands_and_lifecycle_calls() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        let task = task();
        let config = PipelineConfig::default();
        let mut ids = FindingIds::new();
        let ctx = context(
            &channel,
            &lifecycle,
            &task,
            &config,
            &mut ids,
            Instant::now(),
        );

        let output = ctx.execute("true").expect("execute");
        assert!(output.timed_out);
        assert!(output.stderr.contains("budget exhausted"));
        assert!(channel.commands().is_empty());

        let setup = ctx.setup().expect("setup");
        assert!(!setup.success);
        assert!(setup.timed_out);
        assert!(setup.output.contains("budget exhausted"));
        let grade = ctx.grade().expect("grade");
        assert!(grade.timed_out);
        assert!(grade.raw_output.is_empty());
        assert!(lifecycle.calls().is_empty());
    }

    #[test]
    fn lifecycle_timeout_is_clamped_to_the_remaining_phase_budget() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        let task = task();
        let config = PipelineConfig::default();
        let mut ids = FindingIds::new();

        // A near deadline wins over the 30s per-command default.
        let ctx = context(
            &channel,
            &lifecycle,
            &task,
            &config,
            &mut ids,
            Instant::now() + Duration::from_millis(1_500),
        );
        ctx.setup().expect("setup");
        let timeouts = lifecycle.timeouts();
        assert_eq!(timeouts.len(), 1);
        assert!(timeouts[0] <= Duration::from_millis(1_500));

        // A distant deadline leaves the per-command timeout in charge.
        let mut ids = FindingIds::new();
        let ctx = context(
            &channel,
            &lifecycle,
            &task,
            &config,
            &mut ids,
            Instant::now() + Duration::from_secs(600),
        );
        ctx.solve().expect("solve");
        let timeouts = lifecycle.timeouts();
        assert_eq!(timeouts[1], config.command_timeout());
    }

    #[test]
    fn finding_ids_are_category_prefixed_and_sequential() {
        let mut ids = FindingIds::new();
        assert_eq!(
            ids.next(PhaseName::IdempotencyCycling),
            "idempotency_cycling-001"
        );
        assert_eq!(
            ids.next(PhaseName::IdempotencyCycling),
            "idempotency_cycling-002"
        );
        assert_eq!(ids.next(PhaseName::Prerequisites), "prerequisites-001");
    }

    #[test]
    fn outcome_summary_tags_timeouts_distinctly() {
        let mut outcome = LifecycleOutcome::failed("lab start x", "boom");
        assert_eq!(outcome_summary(&outcome), "failed: boom");
        outcome.timed_out = true;
        outcome.duration_ms = 90_000;
        assert!(outcome_summary(&outcome).contains("timed out after 90000ms"));
        assert!(lifecycle_remediation(&outcome, "fix it").contains("raise the configured timeout"));
    }
}
