//! Command-line interface for docqa.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use crate::models::OutputFormat;

/// Question answering over your own documents.
#[derive(Debug, Parser)]
#[command(name = "docqa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest files or directories
    Ingest(commands::IngestArgs),

    /// Answer a question from the ingested documents
    Ask(commands::AskArgs),

    /// Show the passages a question would retrieve
    Search(commands::SearchArgs),

    /// Manage ingested documents
    #[command(subcommand)]
    Documents(commands::DocumentsCommand),

    /// Show document, index and provider status
    Status,

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["docqa", "-f", "json", "ask", "what is wal?", "-k", "3"]);
        assert_eq!(cli.format, Some(OutputFormat::Json));
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.question, "what is wal?");
                assert_eq!(args.top_k, Some(3));
                assert_eq!(args.budget, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_documents_list_filter() {
        let cli = Cli::parse_from(["docqa", "documents", "list", "--status", "error"]);
        assert!(matches!(
            cli.command,
            Commands::Documents(commands::DocumentsCommand::List {
                status: Some(DocumentStatus::Error)
            })
        ));
    }

    #[test]
    fn test_ingest_requires_paths() {
        assert!(Cli::try_parse_from(["docqa", "ingest"]).is_err());
    }
}
