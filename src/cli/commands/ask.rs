use anyhow::{Context, Result};
use clap::Args;

use super::open_engine;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, QueryParams};
use crate::utils::CancelToken;

#[derive(Debug, Args)]
pub struct AskArgs {
    #[arg(required = true, help = "Question to answer from the ingested documents")]
    pub question: String,

    #[arg(long, short = 'k', help = "Maximum number of passages to retrieve")]
    pub top_k: Option<usize>,

    #[arg(long, short = 't', help = "Minimum cosine similarity (-1.0 to 1.0)")]
    pub threshold: Option<f32>,

    #[arg(long, short = 'b', help = "Token budget for the assembled context")]
    pub budget: Option<usize>,
}

impl AskArgs {
    pub(crate) fn params(&self) -> QueryParams {
        QueryParams {
            top_k: self.top_k,
            similarity_threshold: self.threshold,
            token_budget: self.budget,
        }
    }
}

pub async fn handle_ask(
    args: AskArgs,
    format: OutputFormat,
    verbose: bool,
    cancel: CancelToken,
) -> Result<()> {
    let question = args.question.trim();
    if question.is_empty() {
        anyhow::bail!("question cannot be empty");
    }

    let config = Config::load()?;
    let formatter = get_formatter(format);
    let engine = open_engine(&config).await?;

    if verbose {
        eprintln!("Question: \"{question}\"");
        eprintln!("  Index entries: {}", engine.index().len());
    }

    let answer = engine
        .answer(question, &args.params(), &cancel)
        .await
        .context("failed to answer question")?;

    if verbose {
        eprintln!(
            "  Context: {} passages, {} tokens",
            answer.context.passages.len(),
            answer.context.total_tokens
        );
        eprintln!("  Total: {}ms", answer.duration_ms);
        eprintln!();
    }

    print!("{}", formatter.format_answer(&answer));
    Ok(())
}
