//! Cross-task independence: the task must set up with no other task's state
//! present, so it cannot implicitly depend on a previous exercise having run.

use super::{outcome_summary, Phase, PhaseContext};
use crate::exec::ChannelError;
use crate::schema::{PhaseName, Severity};

/// Phrases that mark a setup failure as coupling to another task rather than
/// a generic defect. Changes the remediation, not the severity. Single words
/// like "missing" or "requires" are too broad: "missing disk space" is not a
/// dependency problem.
const DEPENDENCY_MARKERS: &[&str] = &[
    "previous exercise",
    "previous lab",
    "previous task",
    "prerequisite",
    "depends on",
];

pub struct CrossTaskIndependence;

impl Phase for CrossTaskIndependence {
    fn name(&self) -> PhaseName {
        PhaseName::CrossTaskIndependence
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        let forced = ctx.force_teardown_lesson()?;
        ctx.detail("forced_teardown", forced.success.to_string());

        let setup = ctx.setup()?;
        if setup.success {
            ctx.detail("independent", "true");
            return Ok(());
        }

        let summary = outcome_summary(&setup);
        let lowered = setup.output.to_lowercase();
        let marker = DEPENDENCY_MARKERS
            .iter()
            .find(|marker| lowered.contains(*marker));
        let (description, remediation) = match marker {
            Some(marker) => (
                format!(
                    "setup fails from a forced-clean baseline and mentions \"{marker}\" ({summary})"
                ),
                "make the setup self-contained: provision everything the task needs instead of assuming a previous exercise ran".to_string(),
            ),
            None => (
                format!("setup fails from a forced-clean baseline ({summary})"),
                "fix the setup so it succeeds on a freshly provisioned environment".to_string(),
            ),
        };
        ctx.finding(
            Severity::Blocker,
            description,
            remediation,
            vec![forced.command, setup.command],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::phases::{run_phase, FindingIds};
    use crate::schema::{PhaseResult, Task, TaskKind};
    use crate::testkit::{ScriptedChannel, ScriptedLifecycle};

    fn task() -> Task {
        Task {
            id: "selinux-lab".to_string(),
            kind: TaskKind::GradedLab,
            lesson_id: "selinux".to_string(),
        }
    }

    fn run(lifecycle: &ScriptedLifecycle) -> PhaseResult {
        let channel = ScriptedChannel::new();
        run_phase(
            &CrossTaskIndependence,
            &channel,
            lifecycle,
            &task(),
            &PipelineConfig::default(),
            &mut FindingIds::new(),
        )
        .expect("run phase")
    }

    #[test]
    fn setup_from_clean_baseline_passes() {
        let lifecycle = ScriptedLifecycle::new();
        let result = run(&lifecycle);
        assert!(result.passed);
        assert!(result.findings.is_empty());
        assert_eq!(
            lifecycle.calls(),
            vec!["force_teardown:selinux-lab", "setup:selinux-lab"]
        );
        assert_eq!(result.details.get("independent").map(String::as_str), Some("true"));
    }

    #[test]
    fn dependency_wording_picks_the_dependency_remediation() {
        let lifecycle = ScriptedLifecycle::new();
        lifecycle.push_setup_failure("cannot start: requires volume group from previous lab");
        let result = run(&lifecycle);
        assert_eq!(result.findings.len(), 1);
        let finding = &result.findings[0];
        assert_eq!(finding.severity, Severity::Blocker);
        assert!(finding.remediation.contains("self-contained"));
    }

    #[test]
    fn generic_failure_gets_generic_remediation_at_the_same_severity() {
        let lifecycle = ScriptedLifecycle::new();
        lifecycle.push_setup_failure("segmentation fault");
        let result = run(&lifecycle);
        assert_eq!(result.findings.len(), 1);
        let finding = &result.findings[0];
        assert_eq!(finding.severity, Severity::Blocker);
        assert!(finding.remediation.contains("freshly provisioned"));
        assert!(!finding.remediation.contains("self-contained"));
    }

    #[test]
    fn missing_resource_wording_is_not_treated_as_a_dependency() {
        let lifecycle = ScriptedLifecycle::new();
        lifecycle.push_setup_failure("cannot start: missing disk space on /var");
        let result = run(&lifecycle);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::Blocker);
        assert!(!result.findings[0].remediation.contains("self-contained"));
    }
}
