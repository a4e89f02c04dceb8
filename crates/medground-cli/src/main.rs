//! MedGround CLI - Command-line interface
//!
//! Usage:
//!   medground extract <text>
//!   medground ask <question> [--source <text>] [--show-context]
//!   medground format <text>
//!   medground facts
//!   medground chat

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use medground_core::{default_facts, AppConfig, LlmClient, LoggingConfig, TrialFormatter};
use medground_extractor::StructuredExtractor;
use medground_rag::create_llm_client;
use medground_session::{ExtractionSubmission, QueryOutcome, Session};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "medground")]
#[command(about = "Grounded medical question answering over extracted facts")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract typed facts from text
    Extract {
        /// Source text
        text: String,
    },
    /// Ask a question grounded on extracted or default facts
    Ask {
        /// Question to ask
        question: String,
        /// Extract facts from this text first
        #[arg(long)]
        source: Option<String>,
        /// Also print the narrative the answer was grounded on
        #[arg(long)]
        show_context: bool,
    },
    /// Render clinical-trial identifiers in text as links
    Format {
        /// Text to format
        text: String,
    },
    /// Print the default fact set
    Facts,
    /// Interactive session
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    let formatter = TrialFormatter::new(config.grounding.trial_base_url.clone());

    match cli.command {
        Commands::Extract { text } => {
            let extractor = StructuredExtractor::new(llm_client(&config)?)
                .with_temperature(config.grounding.extraction_temperature);
            let outcome = extractor.extract_detailed(&text).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Ask {
            question,
            source,
            show_context,
        } => {
            let session = Session::with_config(llm_client(&config)?, &config.grounding);

            if let Some(source) = source {
                report_extraction(session.submit_extraction(&source).await?);
            }

            match session.submit_query(&question).await {
                QueryOutcome::Rejected(reason) => {
                    anyhow::bail!("Question not accepted: {reason:?}");
                }
                outcome => {
                    if let Some(turn) = outcome.turn() {
                        if show_context {
                            if let Some(narrative) = turn.grounding_context() {
                                println!("Context:\n{narrative}\n");
                            }
                        }
                        println!("{}", TrialFormatter::to_markdown(&turn.render(&formatter)));
                    }
                }
            }
        }
        Commands::Format { text } => {
            println!("{}", TrialFormatter::to_markdown(&formatter.format(&text)));
        }
        Commands::Facts => {
            for fact in default_facts() {
                println!("{fact}");
            }
        }
        Commands::Chat => {
            let session = Session::with_config(llm_client(&config)?, &config.grounding);
            run_chat(&session, &formatter).await?;
        }
    }

    Ok(())
}

/// File config when given, otherwise environment only
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)
            .and_then(AppConfig::with_env_override)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::from_env().context("Invalid environment configuration")?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn llm_client(config: &AppConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    let client = create_llm_client(&config.llm).context("Failed to create LLM client")?;
    tracing::info!("Using LLM: {}", client.name());
    Ok(client)
}

fn report_extraction(submission: ExtractionSubmission) {
    match submission {
        ExtractionSubmission::Replaced { count } => eprintln!("Extracted {count} facts"),
        ExtractionSubmission::Rejected(reason) => eprintln!("Extraction skipped: {reason:?}"),
    }
}

/// Line-oriented REPL over one session
async fn run_chat(session: &Session, formatter: &TrialFormatter) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("MedGround chat. Commands: /extract <text>, /facts, /quit");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/facts" {
            for fact in session.grounding_facts() {
                println!("  {fact}");
            }
            continue;
        }
        if let Some(text) = line.strip_prefix("/extract") {
            match session.submit_extraction(text).await {
                Ok(submission) => report_extraction(submission),
                Err(e) => eprintln!("Extraction failed: {e}"),
            }
            continue;
        }

        match session.submit_query(line).await {
            QueryOutcome::Rejected(reason) => eprintln!("Question not accepted: {reason:?}"),
            outcome => {
                if let Some(turn) = outcome.turn() {
                    println!("{}", TrialFormatter::to_markdown(&turn.render(formatter)));
                }
            }
        }
    }

    Ok(())
}
