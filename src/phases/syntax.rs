//! Command-syntax check: every command quoted in the exercise text must be
//! shell-parseable and its program must resolve on the environment.

use super::{Phase, PhaseContext};
use crate::exec::ChannelError;
use crate::schema::{PhaseName, Severity};

pub struct CommandSyntax;

impl Phase for CommandSyntax {
    fn name(&self) -> PhaseName {
        PhaseName::CommandSyntax
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        let config = ctx.config;
        ctx.detail("checked_commands", config.checked_commands.len().to_string());
        for command in &config.checked_commands {
            let words = match shell_words::split(command) {
                Ok(words) => words,
                Err(err) => {
                    ctx.finding(
                        Severity::High,
                        format!("exercise command is not shell-parseable: `{command}` ({err})"),
                        "fix the quoting in the exercise text",
                        vec![command.clone()],
                    );
                    continue;
                }
            };
            let Some(program) = words.first() else {
                ctx.finding(
                    Severity::High,
                    "exercise text contains an empty command",
                    "remove the empty command from the exercise text",
                    vec![command.clone()],
                );
                continue;
            };
            let probe = format!("command -v {}", shell_words::quote(program));
            let output = ctx.execute(&probe)?;
            if !output.success() {
                ctx.finding(
                    Severity::High,
                    format!(
                        "command `{program}` from the exercise text is not available in the environment"
                    ),
                    format!("install `{program}` or correct the exercise text"),
                    vec![probe],
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::phases::{run_phase, FindingIds};
    use crate::schema::{Task, TaskKind};
    use crate::testkit::{failed_output, ScriptedChannel, ScriptedLifecycle};

    fn task() -> Task {
        Task {
            id: "files-ge".to_string(),
            kind: TaskKind::GuidedExercise,
            lesson_id: "files".to_string(),
        }
    }

    #[test]
    fn empty_command_list_passes_trivially() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        let config = PipelineConfig::default();
        let result = run_phase(
            &CommandSyntax,
            &channel,
            &lifecycle,
            &task(),
            &config,
            &mut FindingIds::new(),
        )
        .expect("run phase");
        assert!(result.passed);
        assert!(channel.commands().is_empty());
        assert_eq!(result.details.get("checked_commands").map(String::as_str), Some("0"));
    }

    #[test]
    fn unbalanced_quoting_is_a_high_finding() {
        let channel = ScriptedChannel::new();
        let lifecycle = ScriptedLifecycle::new();
        let config = PipelineConfig {
            checked_commands: vec!["grep 'open /etc/hosts".to_string()],
            ..PipelineConfig::default()
        };
        let result = run_phase(
            &CommandSyntax,
            &channel,
            &lifecycle,
            &task(),
            &config,
            &mut FindingIds::new(),
        )
        .expect("run phase");
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::High);
        assert!(result.findings[0].description.contains("not shell-parseable"));
        // High alone does not fail the phase under the default threshold.
        assert!(result.passed);
    }

    #[test]
    fn missing_program_is_reported_per_command() {
        let channel = ScriptedChannel::new();
        channel.on("command -v netstat", failed_output(1, ""));
        let lifecycle = ScriptedLifecycle::new();
        let config = PipelineConfig {
            checked_commands: vec![
                "netstat -tlnp".to_string(),
                "ss -tlnp".to_string(),
            ],
            ..PipelineConfig::default()
        };
        let result = run_phase(
            &CommandSyntax,
            &channel,
            &lifecycle,
            &task(),
            &config,
            &mut FindingIds::new(),
        )
        .expect("run phase");
        assert_eq!(result.findings.len(), 1);
        assert!(result.findings[0].description.contains("netstat"));
    }
}
