use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{Answer, Document, DocumentChunk, OutputFormat, RetrievalResult};
use crate::services::EngineStatus;

pub trait Formatter {
    fn format_answer(&self, answer: &Answer) -> String;
    fn format_retrieval(&self, result: &RetrievalResult) -> String;
    fn format_documents(&self, documents: &[Document]) -> String;
    fn format_document(&self, document: &Document, chunks: &[DocumentChunk]) -> String;
    fn format_status(&self, status: &EngineStatus) -> String;
    fn format_ingest_stats(&self, stats: &IngestStats) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub files_scanned: u64,
    pub documents_available: u64,
    pub documents_failed: u64,
    pub files_skipped: u64,
    pub duration_ms: u64,
    pub failures: Vec<IngestFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub document_id: String,
    pub reason: String,
}

fn preview(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{head}...")
    } else {
        head
    }
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_answer(&self, answer: &Answer) -> String {
        let mut output = String::new();
        writeln!(output, "{}", answer.text).unwrap();
        writeln!(output).unwrap();

        if answer.context.is_empty() {
            writeln!(output, "(no passages met the similarity threshold)").unwrap();
            return output;
        }

        writeln!(
            output,
            "Sources ({} passages, {}/{} tokens, {}ms):",
            answer.context.passages.len(),
            answer.context.total_tokens,
            answer.context.budget,
            answer.duration_ms
        )
        .unwrap();
        for (i, passage) in answer.context.passages.iter().enumerate() {
            let truncated = if passage.truncated { " (truncated)" } else { "" };
            writeln!(
                output,
                "  [{}] {}#{} score {:.3}{}",
                i + 1,
                passage.document_id,
                passage.sequence,
                passage.score,
                truncated
            )
            .unwrap();
        }
        output
    }

    fn format_retrieval(&self, result: &RetrievalResult) -> String {
        if result.is_empty() {
            return format!("No results found for: {}\n", result.query);
        }

        let mut output = String::new();
        writeln!(output, "Search results for: \"{}\"", result.query).unwrap();
        writeln!(
            output,
            "Found {} passages in {}ms\n",
            result.len(),
            result.duration_ms
        )
        .unwrap();

        for (i, passage) in result.passages.iter().enumerate() {
            writeln!(output, "{}. [Score: {:.3}]", i + 1, passage.score).unwrap();
            writeln!(
                output,
                "   Document: {} (chunk {})",
                passage.document_id, passage.sequence
            )
            .unwrap();
            writeln!(output, "   ---").unwrap();
            for line in preview(&passage.text, 200).lines() {
                writeln!(output, "   {}", line).unwrap();
            }
            writeln!(output).unwrap();
        }
        output
    }

    fn format_documents(&self, documents: &[Document]) -> String {
        if documents.is_empty() {
            return "No documents.\n".to_string();
        }

        let mut output = String::new();
        writeln!(output, "Documents").unwrap();
        writeln!(output, "---------").unwrap();
        for doc in documents {
            writeln!(
                output,
                "  {:<32} {:<10} chunks: {:<4} gen: {}",
                doc.id, doc.status, doc.chunk_count, doc.generation
            )
            .unwrap();
            if let Some(ref error) = doc.error {
                writeln!(output, "    error: {}", error).unwrap();
            }
        }
        output
    }

    fn format_document(&self, document: &Document, chunks: &[DocumentChunk]) -> String {
        let mut output = String::new();
        writeln!(output, "Document: {}", document.id).unwrap();
        writeln!(output, "  Status:     {}", document.status).unwrap();
        writeln!(output, "  Checksum:   {}", document.checksum).unwrap();
        writeln!(output, "  Size:       {} bytes", document.content.len()).unwrap();
        writeln!(output, "  Generation: {}", document.generation).unwrap();
        match document.live_generation {
            Some(live) => writeln!(output, "  Live:       {}", live).unwrap(),
            None => writeln!(output, "  Live:       none").unwrap(),
        }
        writeln!(output, "  Updated:    {}", document.updated_at.to_rfc3339()).unwrap();
        if let Some(ref error) = document.error {
            writeln!(output, "  Error:      {}", error).unwrap();
        }
        writeln!(output).unwrap();

        for chunk in chunks {
            writeln!(
                output,
                "  #{} ({} tokens, bytes {}..{})",
                chunk.sequence, chunk.token_count, chunk.start_offset, chunk.end_offset
            )
            .unwrap();
            writeln!(output, "    {}", preview(&chunk.text, 120)).unwrap();
        }
        output
    }

    fn format_status(&self, status: &EngineStatus) -> String {
        let mut output = String::new();
        writeln!(output, "Status").unwrap();
        writeln!(output, "------").unwrap();

        writeln!(output, "Documents:").unwrap();
        if status.documents.is_empty() {
            writeln!(output, "  (none)").unwrap();
        }
        for (state, count) in &status.documents {
            writeln!(output, "  {:<12} {}", state, count).unwrap();
        }
        writeln!(output).unwrap();

        writeln!(output, "Index:").unwrap();
        writeln!(output, "  Dimension:   {}", status.index.dimension).unwrap();
        writeln!(output, "  Live:        {}", status.index.live).unwrap();
        writeln!(output, "  Tombstones:  {}", status.index.tombstones).unwrap();
        writeln!(output, "  Partitions:  {}", status.index.partitions).unwrap();
        writeln!(output, "  Compactions: {}", status.index.compactions).unwrap();
        writeln!(output).unwrap();

        writeln!(output, "Embedding:     {}", status.embedding_provider).unwrap();
        writeln!(
            output,
            "Generation:    {} (circuit {:?})",
            status.generation_provider, status.generation_circuit.state
        )
        .unwrap();
        output
    }

    fn format_ingest_stats(&self, stats: &IngestStats) -> String {
        let mut output = String::new();
        writeln!(output, "Ingestion Complete").unwrap();
        writeln!(output, "------------------").unwrap();
        writeln!(output, "Files scanned:       {}", stats.files_scanned).unwrap();
        writeln!(output, "Documents available: {}", stats.documents_available).unwrap();
        writeln!(output, "Documents failed:    {}", stats.documents_failed).unwrap();
        writeln!(output, "Files skipped:       {}", stats.files_skipped).unwrap();
        writeln!(output, "Duration: {}ms", stats.duration_ms).unwrap();
        for failure in &stats.failures {
            writeln!(output, "  ✗ {}: {}", failure.document_id, failure.reason).unwrap();
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

/// Document listing without the raw content bytes.
#[derive(Serialize)]
struct DocumentSummary<'a> {
    id: &'a str,
    status: String,
    checksum: &'a str,
    size_bytes: usize,
    generation: u32,
    live_generation: Option<u32>,
    chunk_count: u32,
    error: Option<&'a str>,
    updated_at: String,
}

impl<'a> From<&'a Document> for DocumentSummary<'a> {
    fn from(doc: &'a Document) -> Self {
        Self {
            id: &doc.id,
            status: doc.status.to_string(),
            checksum: &doc.checksum,
            size_bytes: doc.content.len(),
            generation: doc.generation,
            live_generation: doc.live_generation,
            chunk_count: doc.chunk_count,
            error: doc.error.as_deref(),
            updated_at: doc.updated_at.to_rfc3339(),
        }
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, answer: &Answer) -> String {
        self.render(answer)
    }

    fn format_retrieval(&self, result: &RetrievalResult) -> String {
        self.render(result)
    }

    fn format_documents(&self, documents: &[Document]) -> String {
        let summaries: Vec<DocumentSummary> = documents.iter().map(DocumentSummary::from).collect();
        self.render(&serde_json::json!({ "documents": summaries }))
    }

    fn format_document(&self, document: &Document, chunks: &[DocumentChunk]) -> String {
        let chunks: Vec<serde_json::Value> = chunks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "sequence": c.sequence,
                    "generation": c.generation,
                    "token_count": c.token_count,
                    "start_offset": c.start_offset,
                    "end_offset": c.end_offset,
                    "text": c.text,
                })
            })
            .collect();
        self.render(&serde_json::json!({
            "document": DocumentSummary::from(document),
            "chunks": chunks,
        }))
    }

    fn format_status(&self, status: &EngineStatus) -> String {
        self.render(status)
    }

    fn format_ingest_stats(&self, stats: &IngestStats) -> String {
        self.render(stats)
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({"message": message}).to_string()
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({"error": error}).to_string()
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_answer(&self, answer: &Answer) -> String {
        let mut output = String::new();
        writeln!(output, "## Answer\n").unwrap();
        writeln!(output, "{}\n", answer.text).unwrap();

        if answer.context.is_empty() {
            return output;
        }

        writeln!(output, "### Sources\n").unwrap();
        writeln!(output, "| # | Document | Chunk | Score |").unwrap();
        writeln!(output, "|---|----------|-------|-------|").unwrap();
        for (i, passage) in answer.context.passages.iter().enumerate() {
            writeln!(
                output,
                "| {} | `{}` | {} | {:.3} |",
                i + 1,
                passage.document_id,
                passage.sequence,
                passage.score
            )
            .unwrap();
        }
        output
    }

    fn format_retrieval(&self, result: &RetrievalResult) -> String {
        if result.is_empty() {
            return format!("## No results found\n\nQuery: `{}`\n", result.query);
        }

        let mut output = String::new();
        writeln!(output, "## Search Results\n").unwrap();
        writeln!(output, "**Query:** `{}`\n", result.query).unwrap();
        writeln!(
            output,
            "Found {} passages in {}ms\n",
            result.len(),
            result.duration_ms
        )
        .unwrap();

        for (i, passage) in result.passages.iter().enumerate() {
            writeln!(output, "### {}. Score: {:.3}\n", i + 1, passage.score).unwrap();
            writeln!(
                output,
                "**Document:** `{}` (chunk {})\n",
                passage.document_id, passage.sequence
            )
            .unwrap();
            writeln!(output, "```").unwrap();
            writeln!(output, "{}", passage.text).unwrap();
            writeln!(output, "```\n").unwrap();
        }
        output
    }

    fn format_documents(&self, documents: &[Document]) -> String {
        if documents.is_empty() {
            return "## Documents\n\n*No documents.*\n".to_string();
        }

        let mut output = String::new();
        writeln!(output, "## Documents\n").unwrap();
        writeln!(output, "| Id | Status | Chunks | Generation |").unwrap();
        writeln!(output, "|----|--------|--------|------------|").unwrap();
        for doc in documents {
            writeln!(
                output,
                "| `{}` | {} | {} | {} |",
                doc.id, doc.status, doc.chunk_count, doc.generation
            )
            .unwrap();
        }
        output
    }

    fn format_document(&self, document: &Document, chunks: &[DocumentChunk]) -> String {
        let mut output = String::new();
        writeln!(output, "## Document `{}`\n", document.id).unwrap();
        writeln!(output, "- **Status:** {}", document.status).unwrap();
        writeln!(output, "- **Checksum:** `{}`", document.checksum).unwrap();
        writeln!(output, "- **Generation:** {}", document.generation).unwrap();
        if let Some(ref error) = document.error {
            writeln!(output, "- **Error:** {}", error).unwrap();
        }
        writeln!(output).unwrap();

        for chunk in chunks {
            writeln!(output, "### Chunk {}\n", chunk.sequence).unwrap();
            writeln!(output, "```").unwrap();
            writeln!(output, "{}", chunk.text).unwrap();
            writeln!(output, "```\n").unwrap();
        }
        output
    }

    fn format_status(&self, status: &EngineStatus) -> String {
        let mut output = String::new();
        writeln!(output, "## Status\n").unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        for (state, count) in &status.documents {
            writeln!(output, "| Documents ({}) | {} |", state, count).unwrap();
        }
        writeln!(output, "| Index entries | {} |", status.index.live).unwrap();
        writeln!(output, "| Tombstones | {} |", status.index.tombstones).unwrap();
        writeln!(output, "| Partitions | {} |", status.index.partitions).unwrap();
        writeln!(output, "| Embedding | {} |", status.embedding_provider).unwrap();
        writeln!(
            output,
            "| Generation | {} ({:?}) |",
            status.generation_provider, status.generation_circuit.state
        )
        .unwrap();
        output
    }

    fn format_ingest_stats(&self, stats: &IngestStats) -> String {
        let mut output = String::new();
        writeln!(output, "## Ingestion Complete\n").unwrap();
        writeln!(output, "| Metric | Value |").unwrap();
        writeln!(output, "|--------|-------|").unwrap();
        writeln!(output, "| Files scanned | {} |", stats.files_scanned).unwrap();
        writeln!(output, "| Documents available | {} |", stats.documents_available).unwrap();
        writeln!(output, "| Documents failed | {} |", stats.documents_failed).unwrap();
        writeln!(output, "| Files skipped | {} |", stats.files_skipped).unwrap();
        writeln!(output, "| Duration | {}ms |", stats.duration_ms).unwrap();
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {}\n", error)
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextBlock, DocumentStatus, RankedPassage};
    use uuid::Uuid;

    fn result() -> RetrievalResult {
        RetrievalResult {
            query: "ownership".into(),
            passages: vec![RankedPassage {
                chunk_id: Uuid::nil(),
                document_id: "rust-book".into(),
                sequence: 2,
                score: 0.91,
                text: "Each value has exactly one owner.".into(),
                token_count: 6,
            }],
            duration_ms: 4,
        }
    }

    #[test]
    fn test_text_formatter_lists_passages() {
        let out = TextFormatter.format_retrieval(&result());
        assert!(out.contains("Document: rust-book (chunk 2)"));
        assert!(out.contains("[Score: 0.910]"));
    }

    #[test]
    fn test_json_formatter_round_trips() {
        let out = JsonFormatter::new(false).format_retrieval(&result());
        let parsed: RetrievalResult = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.passages[0].document_id, "rust-book");
    }

    #[test]
    fn test_documents_json_omits_content() {
        let mut doc = Document::new("a", b"secret body".to_vec());
        doc.status = DocumentStatus::Available;
        let out = JsonFormatter::new(false).format_documents(&[doc]);
        assert!(!out.contains("secret"));
        assert!(out.contains("\"status\":\"available\""));
    }

    #[test]
    fn test_answer_without_context() {
        let answer = Answer {
            question: "q".into(),
            text: "no idea".into(),
            insufficient_information: true,
            context: ContextBlock::empty(100),
            duration_ms: 1,
        };
        assert!(TextFormatter.format_answer(&answer).contains("no passages"));
        assert!(!MarkdownFormatter.format_answer(&answer).contains("Sources"));
    }
}
