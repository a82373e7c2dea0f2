//! Workload execution: apply the task's reference workload as an opaque
//! call and record how it went.

use super::{lifecycle_remediation, outcome_summary, Phase, PhaseContext};
use crate::exec::ChannelError;
use crate::schema::{PhaseName, Severity};

pub struct WorkloadExecution;

impl Phase for WorkloadExecution {
    fn name(&self) -> PhaseName {
        PhaseName::WorkloadExecution
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        let outcome = ctx.solve()?;
        ctx.detail("solve_duration_ms", outcome.duration_ms.to_string());
        if !outcome.success {
            let summary = outcome_summary(&outcome);
            let remediation = lifecycle_remediation(
                &outcome,
                "fix the reference workload so it applies cleanly to a freshly set up task",
            );
            ctx.finding(
                Severity::Critical,
                format!("workload application {summary}"),
                remediation,
                vec![outcome.command],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::lifecycle::LifecycleOutcome;
    use crate::phases::{run_phase, FindingIds};
    use crate::schema::{Task, TaskKind};
    use crate::testkit::{ScriptedChannel, ScriptedLifecycle};

    fn task() -> Task {
        Task {
            id: "storage-lab".to_string(),
            kind: TaskKind::GradedLab,
            lesson_id: "storage".to_string(),
        }
    }

    #[test]
    fn successful_workload_produces_no_findings() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        let result = run_phase(
            &WorkloadExecution,
            &channel,
            &lifecycle,
            &task(),
            &PipelineConfig::default(),
            &mut FindingIds::new(),
        )
        .expect("run phase");
        assert!(result.passed);
        assert!(result.findings.is_empty());
        assert_eq!(lifecycle.calls(), vec!["solve:storage-lab"]);
    }

    #[test]
    fn failed_workload_is_critical() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        lifecycle.push_solve(LifecycleOutcome::failed(
            "lab solve storage-lab",
            "device busy",
        ));
        let result = run_phase(
            &WorkloadExecution,
            &channel,
            &lifecycle,
            &task(),
            &PipelineConfig::default(),
            &mut FindingIds::new(),
        )
        .expect("run phase");
        assert!(!result.passed);
        assert_eq!(result.findings[0].severity, Severity::Critical);
        assert!(result.findings[0].description.contains("device busy"));
    }

    #[test]
    fn timed_out_workload_gets_timeout_remediation() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        let mut outcome = LifecycleOutcome::failed("lab solve storage-lab", "");
        outcome.timed_out = true;
        outcome.duration_ms = 30_000;
        lifecycle.push_solve(outcome);
        let result = run_phase(
            &WorkloadExecution,
            &channel,
            &lifecycle,
            &task(),
            &PipelineConfig::default(),
            &mut FindingIds::new(),
        )
        .expect("run phase");
        assert!(result.findings[0].remediation.contains("raise the configured timeout"));
        assert!(result.findings[0].description.contains("timed out"));
    }
}
