use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use lab_verify::config::PipelineConfig;
use lab_verify::exec::{ChannelError, LocalShell};
use lab_verify::lifecycle::LabCommand;
use lab_verify::pipeline::run_pipeline;
use lab_verify::schema::{PipelineOutcome, Severity, Task, TaskKind};

#[derive(Parser, Debug)]
#[command(name = "labv", version, about = "Exercise environment verifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the verification pipeline against one task
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Task identifier passed to the course CLI (e.g. `users-review`)
    task_id: String,

    /// Whether the task is graded; grading polarity only applies to graded labs
    #[arg(long, value_enum, default_value_t = KindArg::GuidedExercise)]
    kind: KindArg,

    /// Lesson the task belongs to
    #[arg(long, default_value = "")]
    lesson: String,

    /// Path to a pipeline config JSON; defaults to the user config dir
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the JSON report here instead of stdout
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Override the course CLI program from the config
    #[arg(long, value_name = "PROGRAM")]
    lab_command: Option<String>,

    /// Shell used to execute commands on the local environment
    #[arg(long, default_value = "sh")]
    shell: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    GuidedExercise,
    GradedLab,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::GuidedExercise => TaskKind::GuidedExercise,
            KindArg::GradedLab => TaskKind::GradedLab,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Commands::Run(args) = cli.command;
    match run(args) {
        Ok(passed) => {
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            if err.is::<ChannelError>() {
                tracing::error!("environment unreachable: {err:#}");
            } else {
                tracing::error!("{err:#}");
            }
            ExitCode::from(2)
        }
    }
}

fn run(args: RunArgs) -> Result<bool> {
    let config = load_config(&args)?;

    // Fail fast when the shell itself is not installed.
    which::which(&args.shell)
        .with_context(|| format!("shell `{}` not found on PATH", args.shell))?;

    let task = Task {
        id: args.task_id.clone(),
        kind: args.kind.into(),
        lesson_id: args.lesson.clone(),
    };

    let channel = LocalShell::new(&args.shell);
    let lab = LabCommand::new(&channel, config.lab_command.clone());

    let result = run_pipeline(&task, &channel, &lab, &config)?;

    let report = serde_json::to_string_pretty(&result).context("serialize report")?;
    match &args.out {
        Some(path) => std::fs::write(path, report)
            .with_context(|| format!("write report to {}", path.display()))?,
        None => println!("{report}"),
    }

    match result.outcome {
        PipelineOutcome::Completed => tracing::info!(
            task = %task.id,
            passed = result.overall_passed,
            blocker = result.findings_at_or_above(Severity::Blocker),
            critical = count_at(&result, Severity::Critical),
            high = count_at(&result, Severity::High),
            low = count_at(&result, Severity::Low),
            "pipeline completed"
        ),
        PipelineOutcome::Aborted { at_phase } => tracing::warn!(
            task = %task.id,
            phase = %at_phase,
            "pipeline aborted at gating phase"
        ),
    }

    Ok(result.overall_passed)
}

fn count_at(result: &lab_verify::schema::PipelineResult, severity: Severity) -> usize {
    result
        .severity_histogram
        .get(&severity)
        .copied()
        .unwrap_or(0)
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => match PipelineConfig::default_path() {
            Some(path) if path.is_file() => PipelineConfig::load(&path)?,
            _ => PipelineConfig::default(),
        },
    };
    if let Some(program) = &args.lab_command {
        config.lab_command = program.clone();
    }
    Ok(config)
}
