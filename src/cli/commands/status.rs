use anyhow::Result;

use super::open_engine;
use crate::cli::output::get_formatter;
use crate::models::{Config, EmbeddingProviderKind, OutputFormat};

pub async fn handle_status(format: OutputFormat, verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let engine = open_engine(&config).await?;

    let status = engine.status().await?;
    print!("{}", formatter.format_status(&status));

    let health = engine.embedder().health_check().await;
    match health {
        Ok(info) if verbose => eprintln!("\nEmbedding provider: {info}"),
        Ok(_) => {}
        Err(e) => {
            eprintln!();
            eprintln!("Warning: embedding provider unavailable: {e}");
            if config.embedding.provider == EmbeddingProviderKind::Http {
                eprintln!("      Check that an embedding server is listening at {}", config.embedding.url);
            }
        }
    }

    if status.documents.get("error").copied().unwrap_or(0) > 0 {
        eprintln!("Hint: failed documents can be retried with: docqa documents reprocess <id>");
    }

    Ok(())
}
