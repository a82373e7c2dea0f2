//! Cleanup validation: a single-cycle deep check that one specific teardown
//! removes the task's working directory and any declared solution-artifact
//! directories. Directory absence is checked explicitly because it is a
//! stronger and cheaper signal than full snapshot diffing.

use super::{lifecycle_remediation, outcome_summary, Phase, PhaseContext};
use crate::exec::ChannelError;
use crate::schema::{PhaseName, Severity};
use crate::snapshot::{self, preview};

const LEFTOVER_PREVIEW_LIMIT: usize = 5;
/// More leftovers than this suggests a systemic rather than incidental gap
/// and escalates the finding one severity level.
const SYSTEMIC_LEFTOVER_THRESHOLD: usize = 5;

pub struct CleanupValidation;

impl Phase for CleanupValidation {
    fn name(&self) -> PhaseName {
        PhaseName::CleanupValidation
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        let before = ctx.capture("pre-teardown")?;

        let teardown = ctx.teardown()?;
        if !teardown.success {
            let summary = outcome_summary(&teardown);
            let remediation =
                lifecycle_remediation(&teardown, "fix the teardown procedure for this task");
            ctx.finding(
                Severity::Critical,
                format!("teardown {summary}"),
                remediation,
                vec![teardown.command],
            );
        }

        let after = ctx.capture("post-teardown")?;
        let delta = snapshot::diff(&before, &after);
        ctx.detail("teardown_change_count", delta.change_count.to_string());

        let config = ctx.config;
        let directories: Vec<String> = config
            .working_dirs
            .iter()
            .chain(config.solution_dirs.iter())
            .cloned()
            .collect();
        for dir in &directories {
            let probe = format!("test -d {}", shell_words::quote(dir));
            if !ctx.execute(&probe)?.success() {
                continue;
            }
            let listing = ctx.execute(&format!(
                "find {} -mindepth 1 2>/dev/null",
                shell_words::quote(dir)
            ))?;
            let mut leftovers: Vec<String> = listing
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToString::to_string)
                .collect();
            leftovers.sort();

            if leftovers.is_empty() {
                ctx.finding(
                    Severity::High,
                    format!("directory {dir} still exists after teardown (empty)"),
                    format!("remove {dir} itself in the teardown procedure"),
                    vec![probe],
                );
            } else {
                let severity = if leftovers.len() > SYSTEMIC_LEFTOVER_THRESHOLD {
                    Severity::Critical
                } else {
                    Severity::High
                };
                let remediation = if severity == Severity::Critical {
                    format!(
                        "teardown misses most of {dir}; rework it to remove the directory tree instead of individual files"
                    )
                } else {
                    format!("add removal steps for the listed files under {dir} to the teardown procedure")
                };
                ctx.finding(
                    severity,
                    format!(
                        "{} files left under {dir} after teardown: {}",
                        leftovers.len(),
                        preview(&leftovers, LEFTOVER_PREVIEW_LIMIT)
                    ),
                    remediation,
                    vec![format!("lab finish {} && ls -laR {dir}", ctx.task.id)],
                );
            }
        }

        Ok(())
    }
}
