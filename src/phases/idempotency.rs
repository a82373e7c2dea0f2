//! Idempotency cycling: prove that repeated setup/teardown cycles are
//! indistinguishable, i.e. teardown is complete.
//!
//! Cycle 1's snapshot is the baseline; every later cycle's snapshot is
//! diffed against it and each nonempty category becomes one finding. Leaked
//! accounts, services, and containers are Critical; leaked files are High
//! since logs and caches are often benign. The phase ends by running setup
//! once more so cleanup validation has live state to tear down.

use super::{lifecycle_remediation, outcome_summary, Phase, PhaseContext};
use crate::exec::ChannelError;
use crate::schema::{PhaseName, Severity};
use crate::snapshot::{self, Category, StateSnapshot, CATEGORIES};

const LEAK_PREVIEW_LIMIT: usize = 5;

pub struct IdempotencyCycling;

impl Phase for IdempotencyCycling {
    fn name(&self) -> PhaseName {
        PhaseName::IdempotencyCycling
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        let cycles = ctx.config.cycles;
        if cycles < 2 {
            ctx.detail("cycles", "fewer than 2 requested; nothing to compare");
            return Ok(());
        }

        let mut snapshots: Vec<StateSnapshot> = Vec::new();
        let mut setup_durations: Vec<u64> = Vec::new();
        let mut setup_broke = false;

        for cycle in 1..=cycles {
            let setup = ctx.setup()?;
            if !setup.success {
                let summary = outcome_summary(&setup);
                // A broken setup after a previous teardown is itself the
                // defect; later cycles would only repeat it.
                let (severity, description) = if cycle == 1 {
                    (
                        Severity::Blocker,
                        format!("setup failed on cycle 1 ({summary}); no baseline snapshot exists"),
                    )
                } else {
                    (
                        Severity::Critical,
                        format!(
                            "setup failed on cycle {cycle} ({summary}); the previous teardown left the environment unable to set up again"
                        ),
                    )
                };
                let remediation = lifecycle_remediation(
                    &setup,
                    "make teardown restore every precondition that setup relies on",
                );
                ctx.finding(severity, description, remediation, vec![setup.command]);
                setup_broke = true;
                break;
            }
            setup_durations.push(setup.duration_ms);

            snapshots.push(ctx.capture(&format!("cycle-{cycle}"))?);

            let teardown = ctx.teardown()?;
            if !teardown.success {
                let summary = outcome_summary(&teardown);
                let remediation = lifecycle_remediation(
                    &teardown,
                    "fix the teardown procedure; a partial teardown will surface as leaks below",
                );
                ctx.finding(
                    Severity::Critical,
                    format!("teardown failed on cycle {cycle} ({summary})"),
                    remediation,
                    vec![teardown.command],
                );
                // Teardown failure does not imply setup will fail; keep cycling.
            }
        }

        ctx.detail("completed_cycles", snapshots.len().to_string());

        if let Some(baseline) = snapshots.first() {
            for (idx, snap) in snapshots.iter().enumerate().skip(1) {
                let cycle = idx + 1;
                let delta = snapshot::diff(baseline, snap);
                if delta.is_clean() {
                    continue;
                }
                for category in CATEGORIES {
                    let entries = delta.category(category);
                    if entries.is_empty() {
                        continue;
                    }
                    let mut parts = Vec::new();
                    if !entries.added.is_empty() {
                        parts.push(format!(
                            "added: {}",
                            snapshot::preview(&entries.added, LEAK_PREVIEW_LIMIT)
                        ));
                    }
                    if !entries.removed.is_empty() {
                        parts.push(format!(
                            "removed: {}",
                            snapshot::preview(&entries.removed, LEAK_PREVIEW_LIMIT)
                        ));
                    }
                    ctx.finding(
                        leak_severity(category),
                        format!(
                            "{} leaked between cycle 1 and cycle {cycle}: {}",
                            category.as_str(),
                            parts.join("; ")
                        ),
                        format!(
                            "add a removal step for the listed {} to the teardown procedure",
                            category.as_str()
                        ),
                        vec![format!(
                            "run setup/teardown {cycle} times and compare the {} listings",
                            category.as_str()
                        )],
                    );
                }
            }
        }

        if let (Some(first), Some(last)) = (setup_durations.first(), setup_durations.last()) {
            if setup_durations.len() >= 2 && *first > 0 && *last > first.saturating_mul(2) {
                ctx.finding(
                    Severity::Low,
                    format!(
                        "setup slowed from {first}ms on cycle 1 to {last}ms on cycle {}",
                        setup_durations.len()
                    ),
                    "look for state accumulating across cycles that the identity sets cannot see (journals, caches, retry backoff)",
                    vec!["time each cycle's setup and compare".to_string()],
                );
            }
        }

        if !setup_broke && !snapshots.is_empty() {
            let restart = ctx.setup()?;
            ctx.detail("left_running", restart.success.to_string());
            if !restart.success {
                let summary = outcome_summary(&restart);
                ctx.finding(
                    Severity::Critical,
                    format!("setup failed when restoring the environment after cycling ({summary})"),
                    "ensure setup still works after repeated cycles",
                    vec![restart.command],
                );
            }
        }

        Ok(())
    }
}

fn leak_severity(category: Category) -> Severity {
    match category {
        // Leaked files are often benign (logs, caches); leaked accounts,
        // services, and containers are operationally dangerous.
        Category::Files => Severity::High,
        _ => Severity::Critical,
    }
}
