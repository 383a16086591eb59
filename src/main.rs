use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use equity_research_agent::config::{Config, LogFormat};
use equity_research_agent::llm::LlmClient;
use equity_research_agent::pipeline::{
    PipelineController, ReportEvent, ResearchDepth, ResearchRequest,
};
use equity_research_agent::store::{NullAnalytics, SqliteStore};
use equity_research_agent::vector::{DocType, EmbeddingIndexer};

#[derive(Parser)]
#[command(name = "equity-research-agent", version, about = "Local equity research assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a research request and stream the report to stdout
    Research {
        /// The research question
        query: String,
        /// Quick analysis: local evidence only, terse answer
        #[arg(long)]
        quick: bool,
        /// Explicit target tickers or company names (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,
    },
    /// Index a text file into the vector store
    Index {
        /// Path to a UTF-8 text file
        file: PathBuf,
        /// Ticker the document is about
        #[arg(long)]
        ticker: Option<String>,
        /// Document kind: news, research_note, company_profile
        #[arg(long, default_value = "news")]
        doc_type: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Equity research agent starting"
    );

    let store = match SqliteStore::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Research {
            query,
            quick,
            targets,
        } => run_research(&config, store, query, quick, targets).await,
        Command::Index {
            file,
            ticker,
            doc_type,
        } => run_index(&config, store, file, ticker, doc_type).await,
    }
}

async fn run_research(
    config: &Config,
    store: SqliteStore,
    query: String,
    quick: bool,
    targets: Vec<String>,
) -> anyhow::Result<()> {
    let controller = Arc::new(PipelineController::from_config(
        config,
        store,
        Arc::new(NullAnalytics),
    )?);

    let mut request = ResearchRequest::new(query);
    if quick {
        request = request.with_depth(ResearchDepth::Quick);
    }
    for target in targets {
        request = request.with_target(target);
    }

    let mut stream = controller.run_research(request);

    // Ctrl-C cancels the run; the pipeline releases in-flight work.
    let cancel = stream.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(event) = stream.next().await {
        match event {
            ReportEvent::Delta(text) => {
                print!("{}", text);
                std::io::stdout().flush().ok();
            }
            ReportEvent::Completed(report) => {
                println!();
                for caveat in &report.caveats {
                    eprintln!("note: {}", caveat);
                }
                info!(
                    completeness = %report.completeness,
                    citations = report.citations.len(),
                    "Research complete"
                );
            }
            ReportEvent::Failed(message) => {
                eprintln!("{}", message);
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

async fn run_index(
    config: &Config,
    store: SqliteStore,
    file: PathBuf,
    ticker: Option<String>,
    doc_type: String,
) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&file).await?;
    let doc_type: DocType = doc_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let llm = LlmClient::new(&config.llm, config.request.clone())?;
    let indexer = EmbeddingIndexer::new(llm, Arc::new(store));

    let source = format!("file:{}", file.display());
    let chunks = indexer
        .index_text(ticker.as_deref(), doc_type, &source, &text)
        .await?;

    info!(chunks, source = %source, "Indexing complete");
    println!("Indexed {} chunks from {}", chunks, file.display());
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
