mod ask;
mod config;
mod documents;
mod ingest;
mod search;
mod status;

pub use ask::AskArgs;
pub use config::ConfigCommand;
pub use documents::DocumentsCommand;
pub use ingest::IngestArgs;
pub use search::SearchArgs;

pub use ask::handle_ask;
pub use config::handle_config;
pub use documents::handle_documents;
pub use ingest::handle_ingest;
pub use search::handle_search;
pub use status::handle_status;

use anyhow::{Context, Result};

use crate::models::Config;
use crate::services::Engine;

/// Load configuration and open the engine, rebuilding the index.
pub(crate) async fn open_engine(config: &Config) -> Result<Engine> {
    Engine::open(config)
        .await
        .context("failed to open the document store")
}
