use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod aggregate;
mod artifacts;
mod config;
mod dataset;
mod error;
mod evaluation;
mod imaging;
mod invoker;
mod judge;
mod leaderboard;
mod models;
mod output;
mod parser;
mod prompt;
mod providers;
mod registry;
mod runner;
mod subjects;

use crate::config::Config;
use crate::leaderboard::ReadmeUpdate;
use crate::models::{Locale, Split, Task};
use crate::output::OutputFormat;
use crate::runner::Runner;

/// KoCEM benchmark CLI - evaluate LLMs on construction engineering exams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain", global = true)]
    output: OutputFormat,

    /// Verbose output - log every request and retry
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a model on each subject and split
    Each(RunArgs),
    /// Recompute per-difficulty breakdowns for finished units
    Diff(RunArgs),
    /// Roll up subjects into split-wide results
    Per(RunArgs),
    /// each, diff and per in sequence, then readme
    Auto(RunArgs),
    /// Rebuild the README leaderboard from stored results
    Readme,
    /// List the subject catalog
    Subjects,
    /// List the model catalog
    Models {
        /// Only show this provider's models
        #[arg(long)]
        provider: Option<String>,
    },
}

/// Overrides for the `[run]` section
#[derive(Args, Debug, Default)]
struct RunArgs {
    #[arg(short, long)]
    model: Option<String>,

    #[arg(short, long)]
    locale: Option<Locale>,

    #[arg(long)]
    task: Option<Task>,

    /// Prompt template name
    #[arg(short, long)]
    prompt: Option<String>,

    /// `latest` or `YYYY-MM-DD`
    #[arg(long)]
    prompt_version: Option<String>,

    #[arg(long, value_delimiter = ',')]
    subjects: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    splits: Vec<Split>,

    /// Attempts per model call
    #[arg(long)]
    retries: Option<u32>,

    /// Per-attempt timeout in seconds; 0 disables it
    #[arg(long)]
    timeout: Option<i64>,

    /// Recompute units whose results already exist
    #[arg(long = "override")]
    override_existing: bool,

    /// Add a per-difficulty breakdown to result.json
    #[arg(long)]
    difficulty: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        let run = &mut config.run;
        if let Some(model) = &self.model {
            run.model = model.clone();
        }
        if let Some(locale) = self.locale {
            run.locale = locale;
        }
        if let Some(task) = self.task {
            run.task = task;
        }
        if let Some(prompt) = &self.prompt {
            run.prompt = prompt.clone();
        }
        if let Some(version) = &self.prompt_version {
            run.prompt_version = version.clone();
        }
        if !self.subjects.is_empty() {
            run.subjects = self.subjects.clone();
        }
        if !self.splits.is_empty() {
            run.splits = self.splits.clone();
        }
        if let Some(retries) = self.retries {
            run.retries = retries;
        }
        if let Some(timeout) = self.timeout {
            run.timeout_secs = timeout;
        }
        run.override_existing |= self.override_existing;
        run.calculate_difficulty |= self.difficulty;
    }
}

/// Daily-rotated log file under `log_dir`, created if missing
fn open_log_file(log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("kocem-eval.log")
        .build(log_dir)
        .with_context(|| format!("Failed to open log file in {}", log_dir.display()))
}

/// Human-readable stderr plus a daily debug log file when `log_dir` is usable;
/// the guard must outlive `main`
fn init_tracing(verbose: bool, log_dir: &Path) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let (file_layer, guard, file_error) = match open_log_file(log_dir) {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!(error = %format!("{:#}", e), "file logging disabled");
    }

    guard
}

fn run_diff(config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    let run = &config.run;
    let subjects = if run.subjects.is_empty() {
        subjects::all_names()
    } else {
        run.subjects.clone()
    };
    aggregate::recompute_difficulties(
        &config.output_path,
        &run.prompt,
        run.locale,
        &artifacts::output_model_id(&run.model),
        &subjects,
        &run.splits,
    )
    .context("Failed to recompute difficulty breakdowns")
}

fn run_per(config: &Config) -> anyhow::Result<Vec<models::TotalResult>> {
    let run = &config.run;
    let model_id = artifacts::output_model_id(&run.model);
    run.splits
        .iter()
        .map(|&split| {
            aggregate::evaluate_total(&config.output_path, &run.prompt, run.locale, &model_id, split)
                .map(|(total, _)| total)
                .with_context(|| format!("Failed to roll up {} results for {}", split, run.model))
        })
        .collect()
}

fn run_readme(config: &Config) -> anyhow::Result<()> {
    let update = leaderboard::update_readme(&config.output_path, &config.prompt_path, &config.readme_path)
        .context("Failed to update README leaderboard")?;
    match update {
        ReadmeUpdate::Updated { path, locales, models } => println!(
            "{} leaderboard updated ({} locales, {} models).",
            path.display(),
            locales,
            models
        ),
        ReadmeUpdate::NothingToUpdate(reason) => println!("Nothing to update: {}", reason),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    let _guard = init_tracing(cli.verbose, &config.log_dir);

    match &cli.command {
        Command::Each(args) => {
            args.apply(&mut config);
            let reports = Runner::new(config).run_each().await.context("Evaluation failed")?;
            output::print_units(&reports, cli.output);
        }
        Command::Diff(args) => {
            args.apply(&mut config);
            let updated = run_diff(&config)?;
            output::print_paths(&updated, cli.output);
        }
        Command::Per(args) => {
            args.apply(&mut config);
            let totals = run_per(&config)?;
            output::print_totals(&totals, cli.output);
        }
        Command::Auto(args) => {
            args.apply(&mut config);
            let reports = Runner::new(config.clone()).run_each().await.context("Evaluation failed")?;
            output::print_units(&reports, cli.output);

            run_diff(&config)?;
            let totals = run_per(&config)?;
            output::print_totals(&totals, cli.output);
            run_readme(&config)?;
        }
        Command::Readme => run_readme(&config)?,
        Command::Subjects => output::print_subjects(subjects::SUBJECTS, cli.output),
        Command::Models { provider } => {
            let entries = registry::entries(provider.as_deref()).context("Failed to list models")?;
            output::print_catalog(&entries, cli.output);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_log_file_in_new_directory() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs/nested");
        assert!(open_log_file(&log_dir).is_ok());
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_unusable_log_directory_is_an_error() {
        let blocker = NamedTempFile::new().unwrap();
        let err = open_log_file(&blocker.path().join("logs")).unwrap_err();
        assert!(err.to_string().contains("Failed to create log directory"));
    }

    #[test]
    fn test_cli_parses_each_overrides() {
        let cli = Cli::try_parse_from([
            "kocem-eval",
            "--output",
            "json",
            "each",
            "--model",
            "claude-sonnet-4",
            "--locale",
            "ko",
            "--subjects",
            "Materials,Interior",
            "--splits",
            "dev,test",
            "--override",
        ])
        .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));

        let Command::Each(args) = cli.command else {
            panic!("expected each");
        };
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.run.model, "claude-sonnet-4");
        assert_eq!(config.run.locale, Locale::Ko);
        assert_eq!(config.run.subjects, vec!["Materials", "Interior"]);
        assert_eq!(config.run.splits, vec![Split::Dev, Split::Test]);
        assert!(config.run.override_existing);
        assert!(!config.run.calculate_difficulty);
        assert_eq!(config.run.retries, 3);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kocem-eval", "readme", "--verbose", "--config", "run.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("run.toml")));
        assert!(matches!(cli.command, Command::Readme));
    }

    #[test]
    fn test_cli_models_provider_filter() {
        let cli = Cli::try_parse_from(["kocem-eval", "models", "--provider", "google"]).unwrap();
        let Command::Models { provider } = cli.command else {
            panic!("expected models");
        };
        assert_eq!(provider.as_deref(), Some("google"));
    }

    #[test]
    fn test_empty_args_keep_config() {
        let mut config = Config::default();
        config.run.calculate_difficulty = true;
        RunArgs::default().apply(&mut config);
        assert!(config.run.calculate_difficulty);
        assert_eq!(config.run.splits, vec![Split::Dev, Split::Test, Split::Val]);
    }
}
