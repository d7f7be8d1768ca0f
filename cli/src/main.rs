use anyhow::Result;
use clap::{Parser, Subcommand};
use scholar_core::records::load_records;
use scholar_core::{Bm25, Corpus, CorpusStats, RankedPage};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "scholar")]
#[command(about = "Rank JSON/JSONL records with BM25 without running the server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank records against a query and print the top hits as JSON
    Search {
        /// Input path (file or directory of .json/.jsonl)
        #[arg(long)]
        input: String,
        /// Free-text query
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 1.2)]
        k1: f64,
        #[arg(long, default_value_t = 0.75)]
        b: f64,
    },
    /// Print corpus statistics for the input records
    Stats {
        #[arg(long)]
        input: String,
        #[arg(long, default_value_t = 1.2)]
        k1: f64,
        #[arg(long, default_value_t = 0.75)]
        b: f64,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Search { input, query, limit, k1, b } => {
            let page = search(&input, &query, limit, Bm25::new(k1, b))?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Commands::Stats { input, k1, b } => {
            let stats = stats(&input, Bm25::new(k1, b))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn search(input: &str, query: &str, limit: usize, bm25: Bm25) -> Result<RankedPage<Value>> {
    let records: Vec<Value> = load_records(input)?;
    let corpus = Corpus::from_records(records);
    tracing::info!(num_docs = corpus.total_documents(), query, "ranking records");
    Ok(bm25.search(&corpus, query, limit).into_page())
}

fn stats(input: &str, bm25: Bm25) -> Result<CorpusStats> {
    let records: Vec<Value> = load_records(input)?;
    let corpus = Corpus::from_records(records);
    corpus.ensure_average_doc_length();
    Ok(bm25.stats(&corpus))
}
