mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use arbiter_common::types::Language;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "arbiter")]
#[command(about = "Arbiter - Validate, grade and analyze candidate code", long_about = None)]
struct Cli {
    /// Engine configuration file (defaults to config/engine.json when present)
    #[arg(long, global = true, env = "ARBITER_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// File holding the candidate code
    #[arg(short, long)]
    source: PathBuf,

    /// Language of the candidate code (python, javascript)
    #[arg(short, long, default_value = "python", value_parser = parse_language)]
    language: Language,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a submission against test cases and print the report
    Grade {
        #[command(flatten)]
        source: SourceArgs,

        /// JSON array of test cases
        #[arg(short, long, conflicts_with = "task", required_unless_present = "task")]
        tests: Option<PathBuf>,

        /// JSON coding task, or `builtin:<id>`; its language, tests and limits are used
        #[arg(long)]
        task: Option<PathBuf>,

        /// Seconds per test case
        #[arg(long)]
        time_limit: Option<f64>,

        /// Megabytes per test case
        #[arg(long)]
        memory_limit: Option<u64>,
    },

    /// Check a submission against the sandbox policy without running it
    Validate {
        #[command(flatten)]
        source: SourceArgs,

        /// Attach the quality report when the code is valid
        #[arg(long, default_value = "false")]
        analyze: bool,
    },

    /// Print the static quality report for a submission
    Analyze {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Print the resolved engine configuration
    Config,

    /// Browse the built-in coding tasks
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List every built-in task
    List,

    /// Print what a candidate sees of one task
    Show {
        /// Task id, with or without the `builtin:` prefix
        id: String,
    },

    /// Print the difficulty of each task in an interview
    Plan {
        /// Candidate level (junior, middle, senior, team-lead)
        #[arg(long)]
        level: Option<String>,

        /// Number of tasks in the interview
        #[arg(long, default_value = "5")]
        total: usize,
    },
}

fn parse_language(name: &str) -> Result<Language, String> {
    Language::parse(name).ok_or_else(|| format!("unknown language '{}' (expected python or javascript)", name))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    let config = cli.config.as_deref();

    let success = match cli.command {
        Commands::Grade {
            source,
            tests,
            task,
            time_limit,
            memory_limit,
        } => {
            let overrides = commands::LimitOverrides {
                time_limit,
                memory_limit,
            };
            match (task, tests) {
                (Some(task), _) => commands::grade_task(config, &source.source, &task, overrides).await?,
                (None, Some(tests)) => {
                    commands::grade(config, &source.source, source.language, &tests, overrides).await?
                }
                (None, None) => bail!("either --tests or --task is required"),
            }
        }
        Commands::Validate { source, analyze } => commands::validate(config, &source.source, source.language, analyze)?,
        Commands::Analyze { source } => commands::analyze(config, &source.source, source.language)?,
        Commands::Config => commands::show_config(config)?,
        Commands::Tasks { action } => match action {
            TaskAction::List => commands::list_tasks()?,
            TaskAction::Show { id } => commands::show_task(&id)?,
            TaskAction::Plan { level, total } => commands::plan_tasks(level.as_deref(), total)?,
        },
    };

    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
