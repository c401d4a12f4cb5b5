use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use inductive_coder::config::Config;
use inductive_coder::llm::openai::OpenAiGateway;
use inductive_coder::model::{AnalysisMode, Document};
use inductive_coder::prompts::{CONTEXT_TEMPLATE, DEFAULT_CONTEXT};
use inductive_coder::workflow::WorkflowOrchestrator;
use inductive_coder::{logging, store};

/// LLM-assisted inductive coding of text documents.
///
/// Round 1 reads the documents and derives a code book; Round 2 applies it
/// to sentences (coding) or whole documents (categorization).
#[derive(Parser)]
#[command(name = "inductive-coder", version, about)]
struct Cli {
    /// Path to the JSON configuration file (default: ./inductive-coder.json).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full analysis and write the results.
    Analyze {
        /// `coding` (per sentence) or `categorization` (per document).
        #[arg(short, long)]
        mode: AnalysisMode,

        /// Directory containing the documents.
        #[arg(short, long)]
        input_dir: PathBuf,

        /// File with the research question and context.
        #[arg(short, long)]
        prompt_file: Option<PathBuf>,

        /// Existing code book; skips Round 1.
        #[arg(short, long)]
        code_book_file: Option<PathBuf>,

        #[arg(short, long, default_value = "./output")]
        output_dir: PathBuf,

        /// Documents processed at once (overrides the config file).
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Run Round 1 only and save the code book.
    Codebook {
        #[arg(short, long)]
        mode: AnalysisMode,

        #[arg(short, long)]
        input_dir: PathBuf,

        #[arg(short, long)]
        prompt_file: Option<PathBuf>,

        /// Where to write the code book JSON.
        #[arg(short, long, default_value = "./code_book.json")]
        output: PathBuf,

        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Write a research context template to fill in.
    PromptTemplate {
        #[arg(short, long, default_value = "prompt_template.md")]
        output: PathBuf,
    },

    /// Print the summary of a saved result.
    Summary {
        #[arg(short, long, default_value = "./output")]
        results_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_default();

    match cli.command {
        Commands::Analyze {
            mode,
            input_dir,
            prompt_file,
            code_book_file,
            output_dir,
            concurrency,
        } => {
            logging::init(Some(&output_dir))?;
            let config = load_config(&config_path, concurrency)?;
            let context = read_context(prompt_file.as_deref())?;
            let documents = load_documents(&input_dir, &config)?;
            let code_book = code_book_file
                .as_deref()
                .map(store::load_code_book)
                .transpose()?;

            let orchestrator = build_orchestrator(&config)?;
            let pb = spinner("Running analysis...");
            let result = orchestrator
                .run(&documents, mode, &context, code_book)
                .await;
            pb.finish_and_clear();
            let result = result?;

            store::save_result(&result, &output_dir)?;
            println!("{}", store::render_summary(&result));
            println!("Results saved to {}", output_dir.display());
        }
        Commands::Codebook {
            mode,
            input_dir,
            prompt_file,
            output,
            concurrency,
        } => {
            logging::init(None)?;
            let config = load_config(&config_path, concurrency)?;
            let context = read_context(prompt_file.as_deref())?;
            let documents = load_documents(&input_dir, &config)?;

            let orchestrator = build_orchestrator(&config)?;
            let pb = spinner("Reading documents...");
            let outcome = orchestrator.run_round1(&documents, mode, &context).await;
            pb.finish_and_clear();
            let outcome = outcome?;

            store::save_code_book(&outcome.code_book, &output)?;
            println!("{}", inductive_coder::prompts::format_code_list(&outcome.code_book));
            println!("\nCode book saved to {}", output.display());
        }
        Commands::PromptTemplate { output } => {
            logging::init(None)?;
            std::fs::write(&output, CONTEXT_TEMPLATE)
                .with_context(|| format!("failed to write template: {}", output.display()))?;
            info!("Prompt template created: {}", output.display());
            println!(
                "Edit {} with your research question, then run:\n  inductive-coder analyze --mode coding --input-dir ./data --prompt-file {}",
                output.display(),
                output.display()
            );
        }
        Commands::Summary { results_dir } => {
            logging::init(None)?;
            let result = store::load_result(&results_dir)?;
            println!("{}", store::render_summary(&result));
        }
    }

    Ok(())
}

/// Load config, apply environment and CLI overrides, validate.
fn load_config(path: &str, concurrency: Option<usize>) -> Result<Config> {
    let mut config = Config::load(path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(n) = concurrency {
        config.concurrency = n;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_context(prompt_file: Option<&Path>) -> Result<String> {
    match prompt_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file: {}", path.display())),
        None => {
            warn!("No prompt file specified, using default context");
            Ok(DEFAULT_CONTEXT.to_string())
        }
    }
}

fn load_documents(dir: &Path, config: &Config) -> Result<Vec<Document>> {
    let documents = store::load_documents(dir, &config.extensions)?;
    anyhow::ensure!(
        !documents.is_empty(),
        "no documents with extensions {:?} found in {}",
        config.extensions,
        dir.display()
    );
    Ok(documents)
}

fn build_orchestrator(config: &Config) -> Result<WorkflowOrchestrator> {
    let gateway = OpenAiGateway::from_config(&config.llm, |key| std::env::var(key).ok())
        .context("failed to set up the LLM gateway")?;
    Ok(WorkflowOrchestrator::new(Arc::new(gateway))
        .with_concurrency(config.concurrency)
        .with_hierarchy(config.hierarchy_depth))
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
