//! chorus - customer support chat for a digital music store

mod commands;
mod config;
mod utils;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chorus_agent::{
    AgentEvent, ChatModel, CheckpointStore, FileCheckpointStore, GraphConfig, GraphInput,
    GraphRunner, MemoryStore, ModelSettings, OutputMode, Persistence, ProviderTransport,
    ResumeInput, RetryConfig, RunOutcome, ThreadId,
};
use chorus_ai::providers::openai::OpenAIProvider;
use chorus_ai::{Message, Model, Provider, ReasoningLevel};
use clap::Parser;

use chorus_cli::catalog::{self, Catalog};
use chorus_cli::team;

use crate::commands::{CommandContext, CommandResult};

/// chorus - customer support chat for a digital music store
#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: o3-mini)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (openai, groq, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// API base URL for an OpenAI-compatible server
    #[arg(long)]
    base_url: Option<String>,

    /// Reasoning level (off, low, medium, high)
    #[arg(long)]
    reasoning_level: Option<String>,

    /// Run in non-interactive mode with a single message
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Continue a saved thread by ID
    #[arg(long)]
    thread: Option<String>,

    /// List saved threads
    #[arg(long)]
    threads: bool,

    /// Catalog location (`.sql` script or SQLite database)
    #[arg(long, env = "CHORUS_DB")]
    db: Option<PathBuf>,

    /// Download the Chinook catalog script and exit
    #[arg(long)]
    fetch_catalog: bool,

    /// Keep threads and memory in process only
    #[arg(long)]
    ephemeral: bool,

    /// How sub-agent output is merged (full-history, last-message)
    #[arg(long, value_parser = parse_output_mode)]
    output_mode: Option<OutputMode>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_output_mode(s: &str) -> Result<OutputMode, String> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "full_history" => Ok(OutputMode::FullHistory),
        "last_message" => Ok(OutputMode::LastMessage),
        other => Err(format!("unknown output mode '{other}' (full-history, last-message)")),
    }
}

/// Effective settings after merging config with CLI args (CLI takes precedence)
#[derive(Debug)]
struct Settings {
    provider: String,
    model: Model,
    reasoning: ReasoningLevel,
    catalog_path: Option<PathBuf>,
    output_mode: OutputMode,
    graph: GraphConfig,
    retry: RetryConfig,
}

impl Settings {
    fn resolve(args: &Args, cfg: &config::Config) -> Self {
        let provider = args
            .provider
            .clone()
            .or(cfg.provider.clone())
            .unwrap_or_else(|| "openai".to_string());

        let model_id = args
            .model
            .clone()
            .or(cfg.model.clone())
            .unwrap_or_else(|| chorus_ai::models::DEFAULT_MODEL_ID.to_string());
        let base_url = args.base_url.as_deref().or(cfg.base_url.as_deref());
        let model = chorus_ai::models::resolve_model(Provider::parse(&provider), &model_id, base_url);

        let reasoning = args
            .reasoning_level
            .as_deref()
            .or(cfg.reasoning_level.as_deref())
            .map(ReasoningLevel::parse)
            .unwrap_or_default();

        let catalog_path = args
            .db
            .clone()
            .or_else(|| cfg.database.as_deref().map(utils::expand_home))
            .or_else(Catalog::default_path);

        let mut graph = GraphConfig::default();
        if let Some(limit) = cfg.recursion_limit {
            graph.recursion_limit = limit;
        }

        let mut retry = RetryConfig::default();
        if let Some(max_retries) = cfg.max_retries {
            retry.max_retries = max_retries;
        }

        Self {
            provider,
            model,
            reasoning,
            catalog_path,
            output_mode: args.output_mode.or(cfg.output_mode).unwrap_or_default(),
            graph,
            retry,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("chorus=debug,chorus_agent=debug,chorus_ai=debug")
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let settings = Settings::resolve(&args, &cfg);

    if args.fetch_catalog {
        let dest = settings
            .catalog_path
            .clone()
            .context("No catalog location; pass --db <path>")?;
        println!("Downloading catalog to {}...", dest.display());
        Catalog::download(&dest).await?;
        println!("Done.");
        return Ok(());
    }

    let persistence = open_persistence(&args, &cfg)?;

    if args.threads {
        let thread_id = ThreadId::generate();
        let ctx = CommandContext {
            persistence: &persistence,
            thread_id: &thread_id,
            model: &settings.model,
            usage: Default::default(),
        };
        if let CommandResult::Message(msg) = commands::ThreadCommand::list(&ctx) {
            println!("{}", msg);
        }
        return Ok(());
    }

    let thread_id = match args.thread {
        Some(ref id) => ThreadId::parse(id)?,
        None => ThreadId::generate(),
    };

    // Check for API key (config or env); keyless providers skip the check
    let provider = Provider::parse(&settings.provider);
    let llm = match (cfg.get_api_key(&settings.provider), provider.api_key_env_var()) {
        (Some(key), _) => OpenAIProvider::new(key),
        (None, None) => OpenAIProvider::without_key(),
        (None, Some(env_var)) => {
            eprintln!("Error: No API key found for {}", settings.provider);
            eprintln!();
            eprintln!("Set your API key with: export {}=your-key", env_var);
            eprintln!("Or add it to config file: chorus --init-config");
            std::process::exit(1);
        }
    };

    let Some(catalog_path) = settings.catalog_path.clone() else {
        anyhow::bail!("No catalog location; pass --db <path>");
    };
    let catalog = match Catalog::open(&catalog_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(catalog::CatalogError::NotFound(path)) => {
            eprintln!("Error: Catalog not found at {}", path.display());
            eprintln!("Download it with: chorus --fetch-catalog");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let transport = Arc::new(
        ProviderTransport::new(Arc::new(llm)).with_retry_config(settings.retry.clone()),
    );
    let mut model_settings = ModelSettings::new(settings.model.clone());
    if settings.reasoning != ReasoningLevel::Off {
        model_settings.reasoning = Some(settings.reasoning);
    }
    let model = ChatModel::new(transport, model_settings);

    let runner = Arc::new(team::build_runner(
        &model,
        &catalog,
        persistence,
        settings.output_mode,
        settings.graph.clone(),
    ));

    // Non-interactive mode
    if let Some(ref command) = args.command {
        return run_command(&runner, &thread_id, command).await;
    }

    run_interactive(&runner, &model, thread_id).await
}

fn open_persistence(args: &Args, cfg: &config::Config) -> anyhow::Result<Persistence> {
    if args.ephemeral {
        return Ok(Persistence::in_memory());
    }

    let threads_dir = cfg
        .threads_dir
        .as_deref()
        .map(utils::expand_home)
        .or_else(FileCheckpointStore::default_dir);
    let memory_file = cfg
        .memory_file
        .as_deref()
        .map(utils::expand_home)
        .or_else(|| dirs::data_local_dir().map(|d| d.join("chorus").join("memory.json")));

    let (Some(threads_dir), Some(memory_file)) = (threads_dir, memory_file) else {
        tracing::warn!("No data directory available, keeping threads in memory");
        return Ok(Persistence::in_memory());
    };

    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(
        FileCheckpointStore::new(&threads_dir)
            .with_context(|| format!("opening thread store {}", threads_dir.display()))?,
    );
    let memory = MemoryStore::open(&memory_file)
        .with_context(|| format!("opening memory store {}", memory_file.display()))?;
    Ok(Persistence::new(checkpoints, Arc::new(memory)))
}

/// Send one customer message: resumes a waiting thread, otherwise starts a turn
async fn send(runner: &GraphRunner, thread_id: &ThreadId, text: &str) -> chorus_agent::Result<RunOutcome> {
    let waiting = runner
        .checkpoint(thread_id)?
        .is_some_and(|checkpoint| checkpoint.is_suspended());
    if waiting {
        runner.resume(thread_id, ResumeInput::new(text)).await
    } else {
        runner.invoke(thread_id, GraphInput::message(text)).await
    }
}

/// Print what the assistants said during one call
fn print_replies(outcome: &RunOutcome) {
    for message in &outcome.new_messages {
        if !matches!(message, Message::Assistant { .. }) {
            continue;
        }
        let text = message.text();
        if text.trim().is_empty() {
            continue;
        }
        println!("{}: {}", message.name().unwrap_or("assistant"), text.trim());
    }
}

/// Spawn a task that prints progress events (handoffs and tool calls)
fn spawn_event_printer(runner: &GraphRunner) -> tokio::task::JoinHandle<()> {
    let mut receiver = runner.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            match event {
                AgentEvent::Handoff { to, .. } => {
                    println!("[-> {}]", to);
                }
                AgentEvent::ToolExecutionStart { tool_name, .. } => {
                    print!("[{}...", tool_name);
                    io::stdout().flush().ok();
                }
                AgentEvent::ToolExecutionEnd {
                    result, is_error, ..
                } => {
                    let preview = utils::truncate_chars(&result.replace('\n', " "), 60);
                    if is_error {
                        println!(" error: {}]", preview);
                    } else {
                        println!(" {}]", preview);
                    }
                }
                AgentEvent::Error { message } => {
                    eprintln!("Error: {}", message);
                }
                _ => {}
            }
        }
    })
}

async fn run_command(runner: &Arc<GraphRunner>, thread_id: &ThreadId, command: &str) -> anyhow::Result<()> {
    println!("chorus> {}", command);
    println!();

    let handle = spawn_event_printer(runner);
    let outcome = send(runner, thread_id, command).await;
    // Wait a bit for final events
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    handle.abort();

    let outcome = outcome?;
    print_replies(&outcome);
    if outcome.is_suspended() {
        println!("\n[Waiting for reply. Continue with: chorus --thread {} -c \"...\"]", thread_id);
    }
    Ok(())
}

async fn run_interactive(
    runner: &Arc<GraphRunner>,
    model: &ChatModel,
    mut thread_id: ThreadId,
) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("chorus ({}) thread: {}", model.settings().model.id, thread_id);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let ctx = CommandContext {
            persistence: runner.persistence(),
            thread_id: &thread_id,
            model: &model.settings().model,
            usage: model.total_usage(),
        };
        if let Some(result) = commands::execute_command(input, &ctx) {
            match result {
                CommandResult::Exit => break,
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::NewThread => {
                    thread_id = ThreadId::generate();
                    println!("Started thread {}", thread_id);
                }
                CommandResult::SwitchThread(id) => match runner.checkpoint(&id) {
                    Ok(Some(_)) => {
                        println!("Switched to thread {}", id);
                        thread_id = id;
                    }
                    Ok(None) => println!("No saved thread {}", id),
                    Err(e) => println!("Failed to load thread: {}", e),
                },
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
            }
            println!();
            continue;
        }

        println!();
        let handle = spawn_event_printer(runner);
        let outcome = send(runner, &thread_id, input).await;
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        handle.abort();

        match outcome {
            Ok(outcome) => print_replies(&outcome),
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }

    Ok(())
}
