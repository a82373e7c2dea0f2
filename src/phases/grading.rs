//! Grading polarity: catch graders that reject the reference solution
//! (false negative) or accept a fresh, unsolved setup (false positive).
//! Applies to graded labs only.

use super::{outcome_summary, Phase, PhaseContext};
use crate::exec::{truncate_utf8, ChannelError};
use crate::lifecycle::GradeOutput;
use crate::schema::{PhaseName, Severity, TaskKind};
use crate::score::parse_score;

const MAX_GRADE_DETAIL: usize = 512;

pub struct GradingPolarity;

impl Phase for GradingPolarity {
    fn name(&self) -> PhaseName {
        PhaseName::GradingPolarity
    }

    fn run(&self, ctx: &mut PhaseContext<'_>) -> Result<(), ChannelError> {
        if ctx.task.kind != TaskKind::GradedLab {
            ctx.detail("applicable", "false (guided exercise has no grading)");
            return Ok(());
        }

        // Scenario 1: the reference solution must earn a full score.
        let solve = ctx.solve()?;
        if !solve.success {
            let summary = outcome_summary(&solve);
            ctx.finding(
                Severity::High,
                format!("reference solution could not be applied ({summary}); polarity check incomplete"),
                "fix the reference solution so the grader can be checked against it",
                vec![solve.command],
            );
        } else {
            let grade = ctx.grade()?;
            ctx.detail(
                "grade_with_solution",
                truncate_utf8(&grade.raw_output, MAX_GRADE_DETAIL),
            );
            match parse_score(&grade.raw_output) {
                None => self.unparseable(ctx, &grade),
                Some(score) if score < 100 => ctx.finding(
                    Severity::Critical,
                    format!(
                        "grading rejects a correct solution (score {score}/100 with the reference solution applied)"
                    ),
                    "align the grading checks with what the reference solution actually produces",
                    vec![solve.command, grade.command],
                ),
                Some(_) => {}
            }
        }

        // Scenario 2: a fresh setup with no solution must score zero.
        let teardown = ctx.teardown()?;
        let setup = ctx.setup()?;
        if !teardown.success || !setup.success {
            let broken = if teardown.success { &setup } else { &teardown };
            let summary = outcome_summary(broken);
            ctx.finding(
                Severity::High,
                format!("could not reset the task to a fresh setup ({summary}); false-positive check skipped"),
                "fix teardown/setup so the grader can be checked against an unsolved task",
                vec![broken.command.clone()],
            );
            return Ok(());
        }
        let grade = ctx.grade()?;
        ctx.detail(
            "grade_without_solution",
            truncate_utf8(&grade.raw_output, MAX_GRADE_DETAIL),
        );
        match parse_score(&grade.raw_output) {
            None => self.unparseable(ctx, &grade),
            Some(score) if score > 0 => ctx.finding(
                Severity::Critical,
                format!(
                    "grading accepts an empty solution - false positive (score {score}/100 on a fresh setup)"
                ),
                "make every grading check fail on a freshly set up, unsolved task",
                vec![setup.command, grade.command],
            ),
            Some(_) => {}
        }
        Ok(())
    }
}

impl GradingPolarity {
    fn unparseable(&self, ctx: &mut PhaseContext<'_>, grade: &GradeOutput) {
        let description = if grade.timed_out {
            "grading timed out before producing a recognizable score".to_string()
        } else {
            format!(
                "grading output not machine-parseable: {}",
                truncate_utf8(&grade.raw_output, MAX_GRADE_DETAIL)
            )
        };
        ctx.finding(
            Severity::High,
            description,
            "emit an explicit PASS/FAIL token or an X/Y score in the grading output",
            vec![grade.command.clone()],
        );
    }
}
