use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod bridge;
mod cli;
mod config;
mod filter;
mod semantic;
#[cfg(test)]
mod tests;

use config::Config;
use filter::Query;
use semantic::{cosine_similarity, EmbeddingClient, Example, ExampleCache, TextEmbedder};

const DEFAULT_EXAMPLES: &str = include_str!("semantic/default_examples.json");

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn start_embedder(config: &Config) -> anyhow::Result<Arc<dyn TextEmbedder>> {
    let client = EmbeddingClient::start(config).context("failed to start embedding worker")?;
    Ok(Arc::new(client))
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();
    let config = Config::load_with(&args.base_dir)?;

    match args.command {
        cli::Command::Search {
            data,
            filter,
            no_semantic,
            count,
        } => {
            let _span = tracing::info_span!("search").entered();

            let docs = match read_json(&data)? {
                Value::Array(docs) => docs,
                _ => anyhow::bail!("{} must hold a JSON array", data.display()),
            };
            let filter: Value =
                serde_json::from_str(&filter).context("filter is not valid JSON")?;

            let mut ctx = config.query_context();
            if config.query.semantic && !no_semantic {
                ctx = ctx.with_embedder(start_embedder(&config)?);
            }

            let query = Query::compile(&filter, &ctx)?;
            let matched = query.filter(&docs)?;
            log::info!("{} of {} documents matched", matched.len(), docs.len());

            if count {
                println!("{} documents found", matched.len());
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&matched)?);
            Ok(())
        }

        cli::Command::Embed { text, passage } => {
            let embedder = start_embedder(&config)?;
            let vector = if passage {
                embedder.embed_passage(&text)?
            } else {
                embedder.embed_query(&text)?
            };

            println!("{}", serde_json::to_string(&vector)?);
            Ok(())
        }

        cli::Command::Similarity { query, passage } => {
            let embedder = start_embedder(&config)?;
            let a = embedder.embed_query(&query)?;
            let b = embedder.embed_passage(&passage)?;

            println!("{}", cosine_similarity(&a, &b));
            Ok(())
        }

        cli::Command::Examples {
            search,
            file,
            limit,
        } => {
            let _span = tracing::info_span!("examples").entered();

            let examples: Vec<Example> = match file {
                Some(path) => serde_json::from_value(read_json(&path)?)
                    .with_context(|| format!("{} does not hold examples", path.display()))?,
                None => serde_json::from_str(DEFAULT_EXAMPLES)?,
            };

            let mut cache = ExampleCache::new(start_embedder(&config)?);
            for example in examples {
                cache.add(example)?;
            }

            let mut ranked = cache.find(&search)?;
            if let Some(limit) = limit {
                ranked.truncate(limit);
            }

            println!("{}", serde_json::to_string_pretty(&ranked)?);
            Ok(())
        }
    }
}
