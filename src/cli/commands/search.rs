use anyhow::{Context, Result};
use clap::Args;

use super::open_engine;
use crate::cli::output::get_formatter;
use crate::error::QueryError;
use crate::models::{Config, OutputFormat, QueryParams};
use crate::utils::CancelToken;

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'k', help = "Maximum number of passages to return")]
    pub top_k: Option<usize>,

    #[arg(long, short = 't', help = "Minimum cosine similarity (-1.0 to 1.0)")]
    pub threshold: Option<f32>,
}

pub async fn handle_search(
    args: SearchArgs,
    format: OutputFormat,
    verbose: bool,
    cancel: CancelToken,
) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let config = Config::load()?;
    let formatter = get_formatter(format);
    let engine = open_engine(&config).await?;

    let params = QueryParams {
        top_k: args.top_k,
        similarity_threshold: args.threshold,
        token_budget: None,
    };

    if verbose {
        eprintln!("Query: \"{query}\"");
        if let Some(k) = params.top_k {
            eprintln!("  Top k: {k}");
        }
        if let Some(t) = params.similarity_threshold {
            eprintln!("  Threshold: {t:.3}");
        }
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueryError::Cancelled),
        result = engine.search(query, &params) => result,
    }
    .context("search failed")?;

    if verbose {
        eprintln!("  Total: {}ms", result.duration_ms);
        eprintln!();
    }

    print!("{}", formatter.format_retrieval(&result));
    Ok(())
}
