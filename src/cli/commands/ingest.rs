//! Ingest command implementation.

use anyhow::{Context, Result};
use clap::Args;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

use super::open_engine;
use crate::cli::output::{IngestFailure, IngestStats, get_formatter};
use crate::error::PipelineError;
use crate::models::{Config, Document, DocumentStatus, OutputFormat};
use crate::services::Engine;
use crate::utils::{CancelToken, SourceFile, collect_files};

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Document id to use (single file only; defaults to the file path)
    #[arg(long)]
    pub id: Option<String>,

    /// Show what would be ingested without ingesting
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn handle_ingest(
    args: IngestArgs,
    format: OutputFormat,
    verbose: bool,
    cancel: CancelToken,
) -> Result<()> {
    let config = Config::load()?;
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let mut files: Vec<SourceFile> = Vec::new();
    for path in &args.paths {
        if !path.exists() {
            anyhow::bail!("path does not exist: {}", path.display());
        }
        files.extend(
            collect_files(path).with_context(|| format!("failed to read {}", path.display()))?,
        );
    }

    if let Some(id) = args.id {
        if files.len() != 1 {
            anyhow::bail!("--id requires exactly one input file, found {}", files.len());
        }
        files[0].document_id = id;
    }

    if files.is_empty() {
        println!("{}", formatter.format_message("No files found to ingest."));
        return Ok(());
    }

    if args.dry_run {
        println!(
            "{}",
            formatter.format_message(&format!("Dry run: Would ingest {} files", files.len()))
        );
        for file in &files {
            println!("  {} -> {}", file.path.display(), file.document_id);
        }
        return Ok(());
    }

    let engine = open_engine(&config).await?;
    let mut stats = IngestStats {
        files_scanned: files.len() as u64,
        ..Default::default()
    };

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut pending = FuturesUnordered::new();
    for file in &files {
        if cancel.is_cancelled() {
            break;
        }
        let content = match std::fs::read(&file.path) {
            Ok(content) => content,
            Err(e) => {
                if verbose {
                    pb.println(format!("Skipping {}: {}", file.path.display(), e));
                }
                stats.files_skipped += 1;
                pb.inc(1);
                continue;
            }
        };

        match submit(&engine, &file.document_id, content, verbose, &pb).await? {
            Some(handle) => pending.push(handle.wait()),
            None => {
                stats.files_skipped += 1;
                pb.inc(1);
            }
        }
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = pending.next() => next,
        };
        let Some(result) = next else { break };
        pb.inc(1);
        match result? {
            DocumentStatus::Available => stats.documents_available += 1,
            _ => stats.documents_failed += 1,
        }
    }
    pb.finish_and_clear();

    if cancel.is_cancelled() {
        anyhow::bail!("ingestion cancelled; unfinished documents resume on `documents reprocess`");
    }

    if stats.documents_failed > 0 {
        for doc in engine.pipeline().documents().await? {
            if doc.status == DocumentStatus::Error
                && files.iter().any(|f| f.document_id == doc.id)
            {
                stats.failures.push(IngestFailure {
                    document_id: doc.id,
                    reason: doc.error.unwrap_or_default(),
                });
            }
        }
    }

    stats.duration_ms = start_time.elapsed().as_millis() as u64;
    print!("{}", formatter.format_ingest_stats(&stats));
    Ok(())
}

/// Submit one file. Unchanged documents are skipped; changed ones are
/// reprocessed with the new content while the stored version keeps
/// answering queries.
async fn submit(
    engine: &Engine,
    document_id: &str,
    content: Vec<u8>,
    verbose: bool,
    pb: &ProgressBar,
) -> Result<Option<crate::services::IngestHandle>> {
    let pipeline = engine.pipeline();
    let checksum = Document::checksum(&content);

    match pipeline.submit(document_id, content.clone()).await {
        Ok(handle) => Ok(Some(handle)),
        Err(PipelineError::AlreadyExists(_)) => {
            let existing = pipeline.document(document_id).await?;
            if existing.checksum == checksum && existing.status != DocumentStatus::Error {
                debug!(document_id, "unchanged, skipping");
                if verbose {
                    pb.println(format!("Unchanged: {document_id}"));
                }
                return Ok(None);
            }
            match pipeline.replace(document_id, content).await {
                Ok(handle) => {
                    if verbose {
                        pb.println(format!("Replacing: {document_id}"));
                    }
                    Ok(Some(handle))
                }
                Err(PipelineError::InvalidTransition { from, .. }) => {
                    pb.println(format!("Skipping {document_id}: still {from}"));
                    Ok(None)
                }
                Err(e) => {
                    Err(anyhow::Error::new(e).context(format!("failed to replace {document_id}")))
                }
            }
        }
        Err(e) => Err(e.into()),
    }
}
