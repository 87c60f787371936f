mod ingest;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragstore_core::config::{Config, StoreConfig};
use ragstore_core::embed::HashEmbedder;
use ragstore_core::types::{Degradation, Filter, FusionStrategy, HybridOptions, SearchOptions};
use ragstore_hybrid::{create_vector_store, list_available_backends, validate_store_credentials, VectorStore};

const DEFAULT_DIMENSION: usize = 384;

#[derive(Parser, Debug)]
#[command(name = "ragstore", version, about = "Vector, keyword and hybrid retrieval over pluggable backends")]
struct Cli {
    /// Config file; defaults to config.toml plus config.<RUST_ENV>.toml
    #[arg(short, long, env = "RAGSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported backends
    Backends,
    /// Check connectivity and credentials of the configured backend
    Validate,
    /// Index every .txt file under a directory
    Ingest {
        dir: PathBuf,
        /// Approximate chunk size in characters
        #[arg(long, default_value_t = 1000)]
        chunk_chars: usize,
    },
    /// Dense similarity search
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        #[arg(long)]
        min_score: Option<f32>,
        /// Metadata equality filter, key=value (repeatable)
        #[arg(long = "where", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// Keyword search
    Lexical {
        query: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        #[arg(long = "where", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// Fused vector and keyword search
    Hybrid {
        query: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        /// 1.0 is pure vector, 0.0 is pure keyword
        #[arg(short, long, default_value_t = 0.5)]
        alpha: f32,
        #[arg(long, value_enum, default_value_t = Fusion::Linear)]
        fusion: Fusion,
        #[arg(long = "where", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// Delete chunks by id, or every chunk of a document
    Delete {
        ids: Vec<String>,
        #[arg(long)]
        document: Option<String>,
    },
    /// Show store statistics
    Stats,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fusion {
    Linear,
    Rrf,
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn to_filter(pairs: Vec<(String, String)>) -> Option<Filter> {
    if pairs.is_empty() {
        return None;
    }
    Some(pairs.into_iter().fold(Filter::new(), |f, (k, v)| f.equals(k, v)))
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(p) => Config::from_figment(Figment::new().merge(Toml::file(p)).merge(Env::prefixed("APP_").split("__"))),
        None => Config::load()?,
    })
}

async fn open_store(config: &Config) -> anyhow::Result<VectorStore> {
    let store_config: StoreConfig = config.store()?;
    let dimension: usize = config.get("embedding.dimension").unwrap_or(DEFAULT_DIMENSION);
    let store = create_vector_store(store_config, Arc::new(HashEmbedder::new(dimension))).await?;
    Ok(store)
}

fn report(degraded: &[Degradation]) {
    for d in degraded {
        eprintln!("warning: {d}");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn preview(content: &str) -> String {
    let line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match line.char_indices().nth(100) {
        Some((i, _)) => format!("{}…", &line[..i]),
        None => line,
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Backends = cli.command {
        for provider in list_available_backends() {
            let port = provider.default_port().map(|p| format!(":{p}")).unwrap_or_else(|| "embedded".to_string());
            let keyword = if provider.has_native_lexical() { "native full-text" } else { "lexical engine" };
            println!("{:<14} {:<10} {keyword}", provider.as_str(), port);
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_ref()).context("loading configuration")?;
    match cli.command {
        Command::Backends => {}
        Command::Validate => {
            let store_config = config.store()?;
            validate_store_credentials(&store_config.backend).await?;
            println!("✅ {} is reachable", store_config.provider().display_name());
        }
        Command::Ingest { dir, chunk_chars } => {
            let store = open_store(&config).await?;
            let summary = ingest::ingest_dir(&store, &dir, chunk_chars).await?;
            report(&summary.degraded);
            store.close().await?;
            println!("✅ Indexed {} chunks from {} files", summary.chunks, summary.files);
        }
        Command::Search { query, top_k, min_score, filters } => {
            let store = open_store(&config).await?;
            let mut options = SearchOptions::top_k(top_k);
            options.min_score = min_score;
            options.filter = to_filter(filters);
            let hits = store.search(&query, &options).await?;
            report(&hits.degraded);
            if cli.json {
                print_json(&hits.value)?;
            } else {
                for (i, h) in hits.iter().enumerate() {
                    println!("{:>2}. {:.4} {} {}", i + 1, h.score, h.id.as_deref().unwrap_or("-"), preview(&h.content));
                }
            }
            store.close().await?;
        }
        Command::Lexical { query, top_k, filters } => {
            let store = open_store(&config).await?;
            let options = SearchOptions { top_k, min_score: None, filter: to_filter(filters) };
            let hits = store.full_text_search(&query, &options).await?;
            report(&hits.degraded);
            if cli.json {
                print_json(&hits.value)?;
            } else {
                for (i, h) in hits.iter().enumerate() {
                    println!("{:>2}. {:.4} {} {}", i + 1, h.score, h.id.as_deref().unwrap_or("-"), preview(&h.content));
                }
            }
            store.close().await?;
        }
        Command::Hybrid { query, top_k, alpha, fusion, filters } => {
            let store = open_store(&config).await?;
            let fusion = match fusion {
                Fusion::Linear => FusionStrategy::Linear,
                Fusion::Rrf => FusionStrategy::Rrf,
            };
            let mut options = HybridOptions::new(alpha, top_k).with_fusion(fusion);
            options.filter = to_filter(filters);
            let hits = store.hybrid_search(&query, &options).await?;
            report(&hits.degraded);
            if cli.json {
                print_json(&hits.value)?;
            } else {
                for (i, h) in hits.iter().enumerate() {
                    println!(
                        "{:>2}. {:.4} [{:?}] {} {}",
                        i + 1,
                        h.score,
                        h.search_type,
                        h.id.as_deref().unwrap_or("-"),
                        preview(&h.content)
                    );
                }
            }
            store.close().await?;
        }
        Command::Delete { ids, document } => {
            let store = open_store(&config).await?;
            let removed = store.delete(&ids, document.as_deref()).await?;
            store.close().await?;
            println!("🗑️  Removed {removed} chunks");
        }
        Command::Stats => {
            let store = open_store(&config).await?;
            let stats = store.get_stats().await?;
            store.close().await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("provider:   {}", stats.provider.display_name());
                println!("location:   {}", stats.persist_path);
                println!("table:      {}", stats.table_name.as_deref().unwrap_or("-"));
                println!("exists:     {}", stats.exists);
                println!("full text:  {}", stats.lexical_engine.as_deref().unwrap_or("unavailable"));
                println!(
                    "documents:  {}",
                    stats.document_count.map(|n| n.to_string()).unwrap_or_else(|| "unknown".to_string())
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
