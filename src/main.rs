//! rustlitreview - Literature Review 4-Stage Data Pipeline
//!
//! Searches PubMed, compiles and deduplicates exports from several databases,
//! collects BibTeX citations from Crossref and tags articles with an LLM.
//!
//! ## Usage
//!
//! ```bash
//! rustlitreview search --query-file query.txt --start-date 2015/01/01 --end-date 2024/12/31
//! rustlitreview compile --pubmed output/pubmed.csv --wos savedrecs.txt --embase embase.csv
//! rustlitreview bibtex --input output/unique_articles.csv
//! rustlitreview extract --input output/unique_articles.csv --limit 100
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rustlitreview::{
    bibtex::{self, CitationStageConfig},
    compile::{self, CompileInputs},
    crossref::CrossrefClient,
    fetch_pool::{PoolConfig, RetryDelay, RetryPolicy},
    pubmed::{self, PubMedClient, QueryOptions},
    tagging::{self, LlmConfig, OpenAiChat},
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Literature Review 4-Stage Data Pipeline
#[derive(Parser)]
#[command(name = "rustlitreview")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage 1: search PubMed and save article details
    Search {
        /// PubMed query (read from --query-file when omitted)
        query: Option<String>,

        /// File holding the query string
        #[arg(long, default_value = "query.txt")]
        query_file: PathBuf,

        /// Publication date lower bound (YYYY/MM/DD)
        #[arg(long)]
        start_date: Option<String>,

        /// Publication date upper bound (YYYY/MM/DD)
        #[arg(long)]
        end_date: Option<String>,

        /// NCBI API key
        #[arg(long, env = "NCBI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// PMIDs per request
        #[arg(long, default_value_t = pubmed::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Stage 2: merge database exports and resolve duplicates
    Compile {
        /// PubMed CSV (as written by `search`)
        #[arg(long)]
        pubmed: Option<PathBuf>,

        /// Web of Science export (repeatable)
        #[arg(long)]
        wos: Vec<PathBuf>,

        /// GreenFile CSV export
        #[arg(long)]
        greenfile: Option<PathBuf>,

        /// Embase CSV export
        #[arg(long)]
        embase: Option<PathBuf>,

        /// Preamble lines before the Embase header
        #[arg(long, default_value_t = compile::EMBASE_SKIP_ROWS)]
        embase_skip_rows: usize,

        /// Field delimiter of the Web of Science exports
        #[arg(long, default_value = "\t")]
        wos_delimiter: char,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Stage 3: fetch BibTeX records from Crossref
    Bibtex {
        /// Table with a DOI column
        #[arg(long, default_value = "./output/unique_articles.csv")]
        input: PathBuf,

        /// Concurrent requests
        #[arg(long, default_value_t = rustlitreview::fetch_pool::DEFAULT_MAX_WORKERS)]
        workers: usize,

        /// Attempts per DOI
        #[arg(long, default_value_t = rustlitreview::fetch_pool::DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = rustlitreview::crossref::DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,

        /// Double the retry delay after each timeout instead of a random 1-3 s wait
        #[arg(long)]
        exponential_backoff: bool,

        /// Keep files already in the BibTeX folder
        #[arg(long)]
        keep_existing: bool,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Stage 4: extract tags from titles and abstracts with an LLM
    Extract {
        /// Table with Title and Abstract columns
        #[arg(long, default_value = "./output/unique_articles.csv")]
        input: PathBuf,

        /// Rows to tag
        #[arg(long, default_value_t = tagging::DEFAULT_LIMIT)]
        limit: usize,

        /// LLM API base URL
        #[arg(long, env = "OPENAI_BASE_URL", default_value = tagging::DEFAULT_BASE_URL)]
        llm_base_url: String,

        /// LLM API key
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        llm_key: Option<String>,

        /// LLM model name
        #[arg(long, default_value = tagging::DEFAULT_MODEL)]
        llm_model: String,

        /// Concurrent requests (1 = sequential)
        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Search {
            query,
            query_file,
            start_date,
            end_date,
            api_key,
            batch_size,
            output,
        } => {
            let query = match query {
                Some(q) => q,
                None => std::fs::read_to_string(&query_file)
                    .with_context(|| format!("Failed to read query file {}", query_file.display()))?,
            };
            let options = QueryOptions {
                query,
                start_date,
                end_date,
                batch_size,
            };
            run_search(options, api_key, &output).await
        }
        Commands::Compile {
            pubmed,
            wos,
            greenfile,
            embase,
            embase_skip_rows,
            wos_delimiter,
            output,
        } => {
            if !wos_delimiter.is_ascii() {
                bail!("--wos-delimiter must be a single ASCII character");
            }
            let inputs = CompileInputs {
                pubmed,
                wos,
                greenfile,
                embase,
                embase_skip_rows,
                wos_delimiter: wos_delimiter as u8,
            };
            run_compile(&inputs, &output)
        }
        Commands::Bibtex {
            input,
            workers,
            max_attempts,
            timeout_secs,
            exponential_backoff,
            keep_existing,
            output,
        } => {
            let mut retry = RetryPolicy {
                max_attempts: max_attempts.max(1),
                ..Default::default()
            };
            if exponential_backoff {
                retry.delay = RetryDelay::Exponential {
                    initial: Duration::from_secs(1),
                    max: Duration::from_secs(30),
                };
            }
            let mut config = CitationStageConfig::in_dir(&input, &output);
            config.clear_output = !keep_existing;
            config.pool = PoolConfig {
                max_workers: workers.max(1),
                retry,
            };
            run_bibtex(&config, Duration::from_secs(timeout_secs)).await
        }
        Commands::Extract {
            input,
            limit,
            llm_base_url,
            llm_key,
            llm_model,
            concurrency,
            output,
        } => {
            let Some(api_key) = llm_key else {
                bail!("An LLM API key is required (--llm-key or OPENAI_API_KEY)");
            };
            let config = LlmConfig {
                base_url: llm_base_url,
                api_key,
                model: llm_model,
                concurrency: concurrency.max(1),
            };
            run_extract(config, &input, &output, limit).await
        }
    }
}

// ============================================================================
// Stage Runners
// ============================================================================

async fn run_search(options: QueryOptions, api_key: Option<String>, output: &Path) -> Result<()> {
    std::fs::create_dir_all(output).context("Failed to create output directory")?;
    let term = options.term();

    println!("\n--- Stage 1: PubMed Search ---");
    println!("Query: {}", term);

    let client = PubMedClient::new(api_key)?;
    let started = Instant::now();
    let outcome = client.query(&options).await;

    println!(
        "Found {} PMIDs, fetched details for {} articles in {:.1}s",
        outcome.pmids.len(),
        outcome.articles.len(),
        started.elapsed().as_secs_f64()
    );
    for error in &outcome.errors {
        println!("Stopped early: {}", error);
    }

    pubmed::save_search_outcome(&outcome, &term, output).context("Failed to save search results")?;
    println!("Saved {}", output.join("pubmed.csv").display());
    Ok(())
}

fn run_compile(inputs: &CompileInputs, output: &Path) -> Result<()> {
    println!("\n--- Stage 2: Database Compilation ---");

    let report = compile::run_compile_stage(inputs, output).context("Compilation failed")?;
    let resolution = &report.resolution;

    for (kind, count) in &report.source_counts {
        println!("{}: {} entries", kind.name(), count);
    }
    println!(
        "Compiled {} articles: {} unique, {} repeated, {} without DOI",
        report.records.len(),
        resolution.unique.len(),
        resolution.repeated_copies(),
        resolution.unidentified.len()
    );
    println!("Statistics saved to {}", output.join(compile::STATS_TXT).display());
    Ok(())
}

async fn run_bibtex(config: &CitationStageConfig, timeout: Duration) -> Result<()> {
    std::fs::create_dir_all(&config.output_folder).context("Failed to create output directory")?;

    println!("\n--- Stage 3: Crossref BibTeX ---");
    println!(
        "Fetching BibTeX for {} ({} workers, {} attempts)...",
        config.input_csv.display(),
        config.pool.max_workers,
        config.pool.retry.max_attempts
    );

    let client = CrossrefClient::new(timeout)?;
    let summary = bibtex::run_citation_stage(&client, config)
        .await
        .context("Citation stage failed")?;

    print!("{}", summary.render());
    info!(
        successes = summary.successes,
        failures = summary.failures,
        "Citation stage complete"
    );
    Ok(())
}

async fn run_extract(config: LlmConfig, input: &Path, output: &Path, limit: usize) -> Result<()> {
    println!("\n--- Stage 4: LLM Tag Extraction ---");
    println!(
        "Tagging up to {} articles with {} ({} concurrent)...",
        limit, config.model, config.concurrency
    );

    let concurrency = config.concurrency;
    let model = OpenAiChat::new(config)?;
    let (stats, usage) = tagging::run_tagging_stage(&model, input, output, limit, concurrency)
        .await
        .context("Tag extraction failed")?;

    println!(
        "Tagged {} articles: {} JSON, {} keyword fallback, {} failed",
        stats.total(),
        stats.json,
        stats.fallback,
        stats.failed
    );
    println!(
        "Token usage: {} prompt + {} completion = {} total",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );
    Ok(())
}
