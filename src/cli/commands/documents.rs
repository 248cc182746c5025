//! Document management commands.

use anyhow::{Context, Result};
use clap::Subcommand;

use super::open_engine;
use crate::cli::output::get_formatter;
use crate::models::{Config, DocumentStatus, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum DocumentsCommand {
    /// List ingested documents
    List {
        /// Only show documents in this state (e.g. available, error)
        #[arg(long, short = 's')]
        status: Option<DocumentStatus>,
    },

    /// Show one document and its active chunks
    Show {
        #[arg(required = true)]
        id: String,
    },

    /// Delete a document; soft by default
    Delete {
        #[arg(required = true)]
        id: String,

        /// Remove the document and its chunks permanently
        #[arg(long)]
        purge: bool,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },

    /// Run a document through the pipeline again
    Reprocess {
        #[arg(required = true)]
        id: String,
    },
}

pub async fn handle_documents(
    cmd: DocumentsCommand,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let engine = open_engine(&config).await?;
    let pipeline = engine.pipeline();

    match cmd {
        DocumentsCommand::List { status } => {
            let mut documents = pipeline.documents().await?;
            if let Some(status) = status {
                documents.retain(|d| d.status == status);
            }
            print!("{}", formatter.format_documents(&documents));
        }
        DocumentsCommand::Show { id } => {
            let document = pipeline.document(&id).await?;
            let chunks = engine.store().list_active_chunks(&id).await?;
            print!("{}", formatter.format_document(&document, &chunks));
        }
        DocumentsCommand::Delete { id, purge, force } => {
            let document = pipeline.document(&id).await?;
            if purge && !force {
                println!("This will permanently remove '{}'. Continue? [y/N]", id);
                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;
                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", formatter.format_message("Cancelled."));
                    return Ok(());
                }
            }

            if document.status != DocumentStatus::Deleted {
                pipeline
                    .delete(&id)
                    .await
                    .with_context(|| format!("failed to delete {id}"))?;
            }
            let message = if purge {
                let chunks = pipeline.purge(&id).await?;
                format!("Purged document '{id}' ({chunks} chunks)")
            } else {
                format!("Deleted document '{id}'")
            };
            println!("{}", formatter.format_message(&message));
        }
        DocumentsCommand::Reprocess { id } => {
            let handle = pipeline.reprocess(&id).await?;
            if verbose {
                eprintln!("Reprocessing {}...", handle.document_id());
            }
            let status = handle.wait().await?;
            let document = pipeline.document(&id).await?;
            let message = match (status, document.error) {
                (DocumentStatus::Available, _) => format!(
                    "Document '{id}' available ({} chunks, generation {})",
                    document.chunk_count, document.generation
                ),
                (status, Some(error)) => format!("Document '{id}' ended {status}: {error}"),
                (status, None) => format!("Document '{id}' ended {status}"),
            };
            println!("{}", formatter.format_message(&message));
        }
    }

    Ok(())
}
