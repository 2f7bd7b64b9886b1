//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quarry_core::{AskRequest, LogSink, OpenRouterClient, Pipeline, RequestContext};
use quarry_search::{BackendRegistry, HttpPageFetcher};
use quarry_shared::{AppConfig, PipelineConfig, init_config, load_config, load_config_from};

/// Exit status for a run stopped by Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Quarry: search, distil, and answer.
#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "Plan web searches for a question, distil the results into facts, and build an answer prompt.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.quarry/quarry.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Answer a question from web search results.
    Ask {
        /// The question to research.
        question: String,

        /// Routing path selecting the search backend (defaults to pipeline.default_path).
        #[arg(short, long)]
        path: Option<String>,

        /// Maximum number of search results to keep.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Rerank results against the question.
        #[arg(long)]
        rerank: bool,

        /// Skip fact extraction and build the prompt from page excerpts.
        #[arg(long)]
        quick: bool,

        /// Send the prompt to the model and print its answer.
        #[arg(long)]
        answer: bool,

        /// Write the intermediate results as JSON to this file.
        #[arg(long)]
        dump_results: Option<PathBuf>,
    },

    /// List the routing paths of the available search backends.
    Paths,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "quarry=info",
        1 => "quarry=debug",
        _ => "quarry=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Ask {
            question,
            path,
            limit,
            rerank,
            quick,
            answer,
            dump_results,
        } => {
            let options = AskOptions {
                path,
                limit,
                rerank,
                quick,
                answer,
                dump_results,
            };
            cmd_ask(config_path.as_deref(), &question, options).await
        }
        Command::Paths => cmd_paths(config_path.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

struct AskOptions {
    path: Option<String>,
    limit: Option<usize>,
    rerank: bool,
    quick: bool,
    answer: bool,
    dump_results: Option<PathBuf>,
}

async fn cmd_ask(config_path: Option<&Path>, question: &str, options: AskOptions) -> Result<()> {
    let config = resolve_config(config_path)?;
    let pipeline_config = PipelineConfig::from(&config);
    pipeline_config.validate()?;

    let registry = BackendRegistry::with_defaults(&config.search)?;
    let fetcher = HttpPageFetcher::new(&config.fetch)?;
    let mut pipeline = Pipeline::new(pipeline_config, Arc::new(registry), Arc::new(fetcher));

    match OpenRouterClient::from_config(&config) {
        Ok(client) => {
            info!(model = client.model(), "LLM configured");
            pipeline = pipeline.with_llm(Arc::new(client));
        }
        Err(e) if options.answer => return Err(e.into()),
        Err(e) => warn!(error = %e, "continuing without an LLM"),
    }

    let request = AskRequest {
        question: question.to_string(),
        path: options
            .path
            .unwrap_or_else(|| config.pipeline.default_path.clone()),
        limit: options.limit,
        rerank: options.rerank.then_some(true),
        deep: options.quick.then_some(false),
    };

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        }
    });

    let sink = Arc::new(CliSink::new());
    let mut ctx = RequestContext::with_token(token, sink.clone());
    info!(request_id = %ctx.id(), path = %request.path, "asking");

    let outcome = match pipeline.run(&mut ctx, &request).await {
        Ok(prompt) if options.answer => pipeline.answer(&ctx, &prompt).await,
        other => other,
    };
    sink.finish();

    if let Some(path) = &options.dump_results {
        let json = serde_json::to_string_pretty(&ctx.results)?;
        std::fs::write(path, json)
            .map_err(|e| eyre!("failed to write results to {}: {e}", path.display()))?;
        info!(path = %path.display(), "results written");
    }

    match outcome {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            let results = &ctx.results;
            eprintln!("{e}");
            eprintln!(
                "  collected: {} search results, {} pages, {} facts",
                results.search_results.len(),
                results.details_search_results.len(),
                results.parsed_facts.len()
            );
            std::process::exit(EXIT_CANCELLED);
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_paths(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let registry = BackendRegistry::with_defaults(&config.search)?;
    if registry.is_empty() {
        return Err(eyre!("no search backends are configured"));
    }
    for path in registry.all_paths() {
        println!("{path}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI log sink
// ---------------------------------------------------------------------------

/// Progress sink using an indicatif spinner; every line is also kept above it.
struct CliSink {
    spinner: ProgressBar,
}

impl CliSink {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl LogSink for CliSink {
    fn log(&self, line: &str) {
        self.spinner.println(format!("  {line}"));
        self.spinner.set_message(line.to_string());
    }
}
