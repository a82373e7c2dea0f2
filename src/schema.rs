//! Schema types for tasks, findings, and pipeline results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One exercise instance to verify. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub lesson_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GuidedExercise,
    GradedLab,
}

/// Defect severity. Declaration order is the severity order, so derived
/// `Ord` gives `Low < High < Critical < Blocker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    High,
    Critical,
    Blocker,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Blocker => "blocker",
        };
        f.write_str(label)
    }
}

/// One reported defect. Created by a phase at the moment it is detected and
/// never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Category-prefixed id, unique within one pipeline run.
    pub id: String,
    pub severity: Severity,
    pub category: PhaseName,
    pub description: String,
    pub remediation: String,
    pub repro_steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    Prerequisites,
    CommandSyntax,
    WorkloadExecution,
    GradingPolarity,
    IdempotencyCycling,
    CleanupValidation,
    CrossTaskIndependence,
}

impl PhaseName {
    /// The fixed execution order of the pipeline.
    pub const EXECUTION_ORDER: [PhaseName; 7] = [
        PhaseName::Prerequisites,
        PhaseName::CommandSyntax,
        PhaseName::WorkloadExecution,
        PhaseName::GradingPolarity,
        PhaseName::IdempotencyCycling,
        PhaseName::CleanupValidation,
        PhaseName::CrossTaskIndependence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseName::Prerequisites => "prerequisites",
            PhaseName::CommandSyntax => "command_syntax",
            PhaseName::WorkloadExecution => "workload_execution",
            PhaseName::GradingPolarity => "grading_polarity",
            PhaseName::IdempotencyCycling => "idempotency_cycling",
            PhaseName::CleanupValidation => "cleanup_validation",
            PhaseName::CrossTaskIndependence => "cross_task_independence",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one phase invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: PhaseName,
    pub passed: bool,
    pub findings: Vec<Finding>,
    pub duration_ms: u64,
    /// Free-form diagnostics (capture warnings, durations, counters).
    pub details: BTreeMap<String, String>,
}

impl PhaseResult {
    pub fn worst_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|finding| finding.severity).max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineOutcome {
    Completed,
    Aborted { at_phase: PhaseName },
}

/// Aggregate result of one pipeline run for one task. Self-contained value;
/// no state is shared between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub task: Task,
    pub outcome: PipelineOutcome,
    /// In execution order. A strict prefix of the full phase list when a
    /// gating phase failed.
    pub phase_results: Vec<PhaseResult>,
    /// Flattened findings, severity-descending; discovery order is preserved
    /// within one severity.
    pub all_findings: Vec<Finding>,
    pub overall_passed: bool,
    pub severity_histogram: BTreeMap<Severity, usize>,
}

impl PipelineResult {
    pub fn findings_at_or_above(&self, severity: Severity) -> usize {
        self.all_findings
            .iter()
            .filter(|finding| finding.severity >= severity)
            .count()
    }
}
