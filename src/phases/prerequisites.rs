//! Prerequisites: is the environment reachable and can the task be set up at
//! all. Any failure here is a Blocker, and this is the only phase that gates
//! the rest of the pipeline under the default policy.

use super::{lifecycle_remediation, outcome_summary, Phase, PhaseContext};
use crate::exec::ChannelError;
use crate::schema::{PhaseName, Severity};

pub struct Prerequisites;

impl Phase for Prerequisites {
    fn name(&self) -> PhaseName {
        PhaseName::Prerequisites
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        let config = ctx.config;

        let probe = ctx.execute("true")?;
        if !probe.success() {
            ctx.finding(
                Severity::Blocker,
                format!("connectivity probe failed ({})", probe.failure_reason()),
                "verify the environment session is alive and accepts commands",
                vec!["true".to_string()],
            );
            return Ok(());
        }

        for tool in &config.required_tools {
            let command = format!("command -v {}", shell_words::quote(tool));
            let output = ctx.execute(&command)?;
            if !output.success() {
                ctx.finding(
                    Severity::Blocker,
                    format!("required tool `{tool}` is not available in the environment"),
                    format!("install `{tool}` in the environment image or drop it from the exercise"),
                    vec![command],
                );
            }
        }
        if ctx.finding_count() > 0 {
            // Setup would fail for the wrong reason without its tools.
            return Ok(());
        }

        let setup = ctx.setup()?;
        ctx.detail("setup_duration_ms", setup.duration_ms.to_string());
        if !setup.success {
            let summary = outcome_summary(&setup);
            let remediation = lifecycle_remediation(
                &setup,
                "fix the setup procedure; nothing can be verified until it succeeds",
            );
            ctx.finding(
                Severity::Blocker,
                format!("task setup {summary}"),
                remediation,
                vec![setup.command],
            );
            return Ok(());
        }

        for dir in &config.working_dirs {
            let command = format!("test -d {}", shell_words::quote(dir));
            let output = ctx.execute(&command)?;
            if !output.success() {
                ctx.finding(
                    Severity::Blocker,
                    format!("expected working directory {dir} is missing after setup"),
                    format!("make the setup procedure create {dir}"),
                    vec![command],
                );
            }
        }

        Ok(())
    }
}
