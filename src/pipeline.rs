//! Pipeline orchestration: run the verification phases in their fixed order,
//! gate on the configured phases, and aggregate findings into one report.

use crate::config::PipelineConfig;
use crate::exec::{ChannelError, CommandChannel};
use crate::lifecycle::TaskLifecycle;
use crate::phases::{
    self, CleanupValidation, CommandSyntax, CrossTaskIndependence, FindingIds, GradingPolarity,
    IdempotencyCycling, Phase, Prerequisites, WorkloadExecution,
};
use crate::schema::{Finding, PipelineOutcome, PipelineResult, Severity, Task};
use std::collections::BTreeMap;

/// Severity at or above which any finding fails the whole run.
pub const OVERALL_FAIL_THRESHOLD: Severity = Severity::Critical;

/// Run every phase against one task. The only error is channel
/// unreachability; every other problem comes back as findings inside the
/// result. A failed gating phase aborts the run and leaves the remaining
/// phases out of `phase_results` entirely.
pub fn run_pipeline(
    task: &Task,
    channel: &dyn CommandChannel,
    lifecycle: &dyn TaskLifecycle,
    config: &PipelineConfig,
) -> Result<PipelineResult, ChannelError> {
    let phases: [&dyn Phase; 7] = [
        &Prerequisites,
        &CommandSyntax,
        &WorkloadExecution,
        &GradingPolarity,
        &IdempotencyCycling,
        &CleanupValidation,
        &CrossTaskIndependence,
    ];

    let mut ids = FindingIds::new();
    let mut phase_results = Vec::with_capacity(phases.len());
    let mut outcome = PipelineOutcome::Completed;

    for phase in phases {
        let name = phase.name();
        tracing::info!(task = %task.id, phase = %name, "running phase");
        let result = phases::run_phase(phase, channel, lifecycle, task, config, &mut ids)?;
        tracing::info!(
            phase = %name,
            passed = result.passed,
            findings = result.findings.len(),
            duration_ms = result.duration_ms,
            "phase finished"
        );
        let gate = config.is_gating(name) && !result.passed;
        phase_results.push(result);
        if gate {
            tracing::warn!(phase = %name, "gating phase failed; aborting pipeline");
            outcome = PipelineOutcome::Aborted { at_phase: name };
            break;
        }
    }

    let mut all_findings: Vec<Finding> = phase_results
        .iter()
        .flat_map(|result| result.findings.iter().cloned())
        .collect();
    // Stable sort keeps discovery order within one severity.
    all_findings.sort_by(|a, b| b.severity.cmp(&a.severity));

    let mut severity_histogram: BTreeMap<Severity, usize> = BTreeMap::new();
    for finding in &all_findings {
        *severity_histogram.entry(finding.severity).or_insert(0) += 1;
    }

    let overall_passed = outcome == PipelineOutcome::Completed
        && all_findings
            .iter()
            .all(|finding| finding.severity < OVERALL_FAIL_THRESHOLD);

    Ok(PipelineResult {
        task: task.clone(),
        outcome,
        phase_results,
        all_findings,
        overall_passed,
        severity_histogram,
    })
}
