//! Query records handed to the feedback collaborator.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Answer;

/// One answered query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub context: String,
    pub chunk_ids: Vec<Uuid>,
    pub response: String,
    pub insufficient_information: bool,
    pub duration_ms: u64,
}

impl FeedbackRecord {
    pub fn from_answer(answer: &Answer) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            query: answer.question.clone(),
            context: answer.context.text.clone(),
            chunk_ids: answer.context.passages.iter().map(|p| p.chunk_id).collect(),
            response: answer.text.clone(),
            insufficient_information: answer.insufficient_information,
            duration_ms: answer.duration_ms,
        }
    }
}

#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn emit(&self, record: FeedbackRecord) -> anyhow::Result<()>;
}

/// Appends records as JSON lines.
#[derive(Debug)]
pub struct JsonlFeedbackSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFeedbackSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl FeedbackSink for JsonlFeedbackSink {
    async fn emit(&self, record: FeedbackRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeedbackSink;

#[async_trait]
impl FeedbackSink for NoopFeedbackSink {
    async fn emit(&self, _record: FeedbackRecord) -> anyhow::Result<()> {
        Ok(())
    }
}
