//! `augur` command line.
//!
//! ```bash
//! # Build the corpus and its embedding cache
//! augur build --source data/rules --out data/tarot_corpus_v1.jsonl --cache-dir data/cache
//!
//! # Query it
//! augur query "Jupiter in Sagittarius" --corpus data/tarot_corpus_v1.jsonl --flag USE_BM25=false
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use augur_builder::{BuildOptions, QueryOptions, build_corpus, error_body, exit_code, run_query};
use augur_corpus::{DEFAULT_VERSION, KoreanPolicy};
use augur_embeddings::DEFAULT_MODEL;

#[derive(Parser)]
#[command(name = "augur")]
#[command(about = "Build and query the augur retrieval corpus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn rule files into a JSONL corpus
    Build {
        /// Directory of JSON and CSV rule files
        #[arg(long, env = "RULES_DIR")]
        source: PathBuf,

        /// Corpus file to write
        #[arg(long, env = "CORPUS_PATH")]
        out: PathBuf,

        /// Corpus version stamped on every document
        #[arg(long = "corpus-version", default_value = DEFAULT_VERSION)]
        corpus_version: String,

        /// merge, separate or primary_only
        #[arg(long, default_value = "separate", value_parser = parse_policy)]
        korean: KoreanPolicy,

        /// Skip entity tagging
        #[arg(long)]
        no_tags: bool,

        /// Overwrite an existing corpus with different content
        #[arg(long)]
        force: bool,

        /// Also write the embedding cache here
        #[arg(long, env = "EMBED_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Embedding model for the cache
        #[arg(long, env = "EMBED_MODEL", default_value = DEFAULT_MODEL)]
        model: String,
    },

    /// Run one query and print the context
    Query {
        text: String,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Corpus file or rule directory
        #[arg(long)]
        corpus: Option<PathBuf>,

        #[arg(long)]
        graph_dir: Option<PathBuf>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,

        #[arg(short, long)]
        domain: Option<String>,

        #[arg(long)]
        locale: Option<String>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Flag override, e.g. USE_BM25=false (repeatable)
        #[arg(long = "flag")]
        flags: Vec<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_policy(value: &str) -> Result<KoreanPolicy, String> {
    KoreanPolicy::parse(value).ok_or_else(|| format!("unknown Korean policy: {value}"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Build {
            source,
            out,
            corpus_version,
            korean,
            no_tags,
            force,
            cache_dir,
            model,
        } => {
            let options = BuildOptions {
                source,
                output: out,
                version: corpus_version,
                korean_policy: korean,
                tag_entities: !no_tags,
                force,
                cache_dir,
                model,
            };
            build(&options).await
        }
        Commands::Query {
            text,
            config,
            corpus,
            graph_dir,
            cache_dir,
            domain,
            locale,
            top_k,
            flags,
            json,
        } => {
            let options = QueryOptions {
                text,
                config,
                corpus,
                graph_dir,
                cache_dir,
                domain,
                locale,
                top_k,
                flags,
            };
            query(&options, json).await
        }
    };
    std::process::exit(code);
}

async fn build(options: &BuildOptions) -> i32 {
    let result = build_corpus(options)
        .await
        .with_context(|| format!("building corpus from {}", options.source.display()));
    match result.and_then(|report| Ok(serde_json::to_string_pretty(&report)?)) {
        Ok(summary) => {
            println!("{summary}");
            exit_code::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            augur_builder::exit_code_for(&err)
        }
    }
}

async fn query(options: &QueryOptions, json: bool) -> i32 {
    match run_query(options).await {
        Ok(response) if json => match serde_json::to_string_pretty(&response) {
            Ok(body) => {
                println!("{body}");
                exit_code::SUCCESS
            }
            Err(err) => {
                eprintln!("error: {err}");
                exit_code::FAILURE
            }
        },
        Ok(response) => {
            println!("{}", response.context.text);
            exit_code::SUCCESS
        }
        Err(err) => {
            if json {
                println!("{}", error_body(&err));
            }
            eprintln!("error: {err}");
            match err.code() {
                "source_missing" => exit_code::SOURCE_MISSING,
                _ => exit_code::FAILURE,
            }
        }
    }
}
