//! Utility modules.

pub mod cancel;
pub mod file;
pub mod retry;
pub mod text;

pub use cancel::CancelToken;
pub use file::{SourceFile, collect_files};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
pub use text::{count_tokens, normalize, token_spans, truncate_tokens};
