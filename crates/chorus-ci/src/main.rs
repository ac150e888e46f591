//! chorus-ci - prompt-manifest webhook, end-to-end evaluation and its report

mod config;
mod evaluate;
mod github;
mod langsmith;
mod report;
mod webhook;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, bail};
use chorus_agent::{
    ChatModel, GraphConfig, ModelSettings, OutputMode, Persistence, ProviderTransport, Transport,
};
use chorus_ai::providers::openai::OpenAIProvider;
use chorus_ai::{Provider, models};
use chorus_cli::catalog::Catalog;
use chorus_cli::team;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{GithubConfig, LangSmithConfig};
use crate::evaluate::{CorrectnessJudge, EvalOptions, GraphTarget};
use crate::github::GithubClient;
use crate::langsmith::{ExperimentSource, LangSmithClient};
use crate::report::ExperimentReport;

#[derive(Parser, Debug)]
#[command(name = "chorus-ci")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the prompt-commit webhook server
    Serve {
        /// Listen address
        #[arg(long, env = "CHORUS_CI_ADDR")]
        addr: Option<String>,
    },

    /// Summarize evaluation results as a Markdown comment
    Report {
        /// Evaluation config files (default: evaluation_config__*.json)
        configs: Vec<PathBuf>,

        /// Where to write the Markdown
        #[arg(short, long, default_value = report::DEFAULT_OUTPUT)]
        output: PathBuf,
    },

    /// Run the support graph over a dataset, grade the replies and write
    /// an evaluation config
    Evaluate(EvaluateArgs),
}

#[derive(clap::Args, Debug)]
struct EvaluateArgs {
    /// LangSmith dataset to evaluate against
    #[arg(long, default_value = evaluate::DEFAULT_DATASET)]
    dataset: String,

    /// Experiment name prefix
    #[arg(long, default_value = evaluate::DEFAULT_PREFIX)]
    prefix: String,

    /// Catalog location (`.sql` script or SQLite database)
    #[arg(long, env = "CHORUS_DB")]
    db: Option<PathBuf>,

    /// Model behind the support team
    #[arg(short, long, default_value = models::DEFAULT_MODEL_ID)]
    model: String,

    /// Model grading the replies
    #[arg(long, default_value = models::DEFAULT_MODEL_ID)]
    judge_model: String,

    /// Answer given when the graph asks the customer to identify themselves
    #[arg(long, default_value = evaluate::DEFAULT_RESUME)]
    resume_text: String,

    /// Examples evaluated at once
    #[arg(long, default_value_t = evaluate::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Directory for the evaluation config file
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "chorus_ci=debug" } else { "chorus_ci=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match args.command {
        Command::Serve { addr } => {
            let addr = config::listen_addr(addr)?;
            let github = GithubConfig::from_env()?;
            let state = webhook::AppState {
                github: Arc::new(GithubClient::new(github)),
            };
            webhook::serve(addr, state).await
        }
        Command::Report { configs, output } => {
            let configs = if configs.is_empty() {
                find_configs(report::DEFAULT_CONFIG_GLOB)?
            } else {
                configs
            };
            if configs.is_empty() {
                bail!("No evaluation config files found");
            }

            let client = LangSmithClient::new(LangSmithConfig::from_env()?)?;
            let reports = collect(&configs, &client).await;
            if reports.is_empty() {
                bail!("No experiment results to report");
            }
            write_report(&output, &reports)?;
            println!("Report written to {}", output.display());
            Ok(())
        }
        Command::Evaluate(args) => run_evaluate(args).await,
    }
}

async fn run_evaluate(args: EvaluateArgs) -> anyhow::Result<()> {
    let client = LangSmithClient::new(LangSmithConfig::from_env()?)?;
    let api_key = config::openai_api_key(|key| std::env::var(key).ok())?;
    let transport: Arc<dyn Transport> =
        Arc::new(ProviderTransport::new(Arc::new(OpenAIProvider::new(api_key))));
    let chat_model = |id: &str| {
        ChatModel::new(
            Arc::clone(&transport),
            ModelSettings::new(models::resolve_model(Provider::OpenAI, id, None)),
        )
    };

    let catalog_path = args
        .db
        .or_else(Catalog::default_path)
        .context("No catalog location; pass --db <path>")?;
    let catalog = Arc::new(
        Catalog::open(&catalog_path)
            .with_context(|| format!("opening catalog {}", catalog_path.display()))?,
    );
    let runner = team::build_runner(
        &chat_model(&args.model),
        &catalog,
        Persistence::in_memory(),
        OutputMode::default(),
        GraphConfig::default(),
    );
    let target = GraphTarget::new(Arc::new(runner), args.resume_text);
    let judge = CorrectnessJudge::new(chat_model(&args.judge_model));

    let options = EvalOptions {
        dataset: args.dataset,
        experiment_prefix: args.prefix,
        concurrency: args.concurrency,
        output_dir: args.output_dir,
        ..Default::default()
    };
    let summary = evaluate::evaluate(&client, &target, &judge, &options).await?;
    tracing::info!(
        examples = summary.examples,
        correct = summary.correct,
        failed = summary.failed,
        "Evaluation finished"
    );
    println!("✅ Evaluation completed: {}", summary.experiment);
    println!("::set-output name=config_filename::{}", summary.config_path.display());
    Ok(())
}

fn find_configs(pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = glob::glob(pattern)
        .context("Invalid config pattern")?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

async fn collect(configs: &[PathBuf], source: &dyn ExperimentSource) -> Vec<ExperimentReport> {
    let mut reports = Vec::new();
    for path in configs {
        if let Some(report) = report::process_config(path, source).await {
            reports.push(report);
        }
    }
    reports
}

fn write_report(path: &Path, reports: &[ExperimentReport]) -> anyhow::Result<()> {
    let markdown = report::render_markdown(reports);
    std::fs::write(path, markdown)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    let errors = reports.iter().filter(|r| r.is_error()).count();
    if errors > 0 {
        tracing::warn!("{} experiment(s) could not be evaluated", errors);
    }
    tracing::info!("Wrote {} experiment section(s)", reports.len());
    Ok(())
}
