//! Doc Extractor - multi-engine OCR/NER for images and PDFs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doc_extractor::aggregate::{output_dir_for, serialize, write_document};
use doc_extractor::config::Settings;
use doc_extractor::loader::{collect_inputs, load_pages};
use doc_extractor::orchestrator::{Orchestrator, OrchestratorOptions};
use doc_extractor::registry::build_registry;
use doc_extractor::request::{parse_list, ExtractionRequest, RequestedEngine};
use doc_extractor::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "doc-extractor")]
#[command(about = "Extract text and entities from images and PDFs with multiple engines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a file or directory and write one JSON result per input
    Process {
        /// Input file or directory
        input: PathBuf,

        /// Directory receiving `<stem>.json` results
        output_dir: PathBuf,

        /// OCR engines to run (comma or space separated)
        #[arg(long, default_value = "tesseract")]
        engines: String,

        /// NER engines to run over the OCR text
        #[arg(long)]
        ner: Option<String>,

        /// OCR engine whose text feeds the NER engines
        #[arg(long)]
        ner_source: Option<String>,

        /// Language hints (ISO 639-1 or engine-native codes)
        #[arg(long)]
        languages: Option<String>,

        /// Descend into subdirectories
        #[arg(long)]
        recursive: bool,
    },

    /// Run the HTTP API
    Serve {
        /// Host address to bind to
        #[arg(long, env = "API_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "API_PORT")]
        port: Option<u16>,
    },

    /// List registered engines
    Engines,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_extractor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let client = reqwest::Client::builder()
        .timeout(settings.engine_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let registry = Arc::new(build_registry(&settings, client)?);
    let orchestrator = Orchestrator::new(registry, OrchestratorOptions::from_settings(&settings));

    match cli.command {
        Command::Process {
            input,
            output_dir,
            engines,
            ner,
            ner_source,
            languages,
            recursive,
        } => {
            let engines: Vec<RequestedEngine> = parse_list(&engines)
                .into_iter()
                .map(RequestedEngine::ocr)
                .chain(
                    ner.as_deref()
                        .map(parse_list)
                        .unwrap_or_default()
                        .into_iter()
                        .map(RequestedEngine::ner),
                )
                .collect();
            let languages = languages
                .as_deref()
                .map(parse_list)
                .unwrap_or_else(|| settings.default_languages.clone());

            let options = ProcessOptions {
                engines,
                languages,
                ner_source,
                recursive,
            };
            process(&orchestrator, &input, &output_dir, &options).await
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.api_host.clone());
            let port = port.unwrap_or(settings.api_port);
            info!("Starting doc-extractor v{}", env!("CARGO_PKG_VERSION"));

            let state = AppState {
                orchestrator: Arc::new(orchestrator),
                settings: Arc::new(settings),
            };
            server::run(state, &host, port).await
        }
        Command::Engines => {
            for engine in orchestrator.registry().list() {
                println!(
                    "{:<18} {:<4} {:<6} {:?}",
                    engine.name,
                    engine.kind.to_string(),
                    format!("{:?}", engine.locality).to_lowercase(),
                    engine.input
                );
            }
            Ok(())
        }
    }
}

struct ProcessOptions {
    engines: Vec<RequestedEngine>,
    languages: Vec<String>,
    ner_source: Option<String>,
    recursive: bool,
}

async fn process(
    orchestrator: &Orchestrator,
    input: &std::path::Path,
    output_dir: &std::path::Path,
    options: &ProcessOptions,
) -> anyhow::Result<()> {
    let files = collect_inputs(input, options.recursive)?;
    info!("Processing {} file(s) into {:?}", files.len(), output_dir);

    let mut written = 0usize;
    let mut failed = 0usize;

    for file in &files {
        let pages = match load_pages(file).await {
            Ok(pages) => pages,
            Err(e) => {
                error!("Skipping {:?}: {:#}", file, e);
                failed += 1;
                continue;
            }
        };

        let mut request = ExtractionRequest::new(pages)
            .with_languages(options.languages.clone())
            .with_engines(options.engines.clone());
        if let Some(source) = &options.ner_source {
            request = request.with_ner_text_source(source.clone());
        }

        // Request errors (unknown engine, kind mismatch) apply to every file
        let result = orchestrator.run(request).await?;
        let target = output_dir_for(input, file, output_dir);
        write_document(&target, file, &serialize(&result))?;
        written += 1;
    }

    info!("Done: {} written, {} skipped", written, failed);
    Ok(())
}
