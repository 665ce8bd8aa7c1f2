//! `query_tool`: similarity search over log chunks
//!
//! Embedding and index storage live behind [`SemanticSearch`]. The binary
//! wires [`LineScanSearch`], a lexical stand-in that windows the log file and
//! ranks windows by query-term overlap.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::registry::{Tool, ToolError};
use crate::agent::prompts::QUERY_TOOL;

/// Default number of chunks returned
pub const DEFAULT_TOP_K: usize = 3;

/// Substrings that mark a chunk as containing an error
const ERROR_MARKERS: [&str; 5] = ["error", "exception", "fail", "critical", "fatal"];

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("failed to read log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("search backend error: {0}")]
    Backend(String),
}

/// One retrieved log chunk
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub has_error: bool,
}

/// Opaque similarity search over indexed log chunks
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Up to `k` chunks most similar to `text`, best first
    async fn search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Lexical search over fixed windows of a log file.
///
/// The file is re-read on every query, so appends are picked up.
#[derive(Debug, Clone)]
pub struct LineScanSearch {
    log_file_path: PathBuf,
    window: usize,
}

impl LineScanSearch {
    pub fn new(log_file_path: impl Into<PathBuf>) -> Self {
        Self {
            log_file_path: log_file_path.into(),
            window: 20,
        }
    }

    /// Lines per chunk (at least 1)
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    fn rank(&self, content: &str, text: &str, k: usize) -> Vec<SearchHit> {
        let terms = query_terms(text);
        if terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let lines: Vec<&str> = content.lines().collect();
        let mut hits: Vec<SearchHit> = lines
            .chunks(self.window)
            .enumerate()
            .filter_map(|(i, chunk)| {
                let body = chunk.join("\n");
                let lower = body.to_lowercase();
                let score: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
                if score == 0 {
                    return None;
                }
                let start_line = i * self.window + 1;
                Some(SearchHit {
                    has_error: ERROR_MARKERS.iter().any(|m| lower.contains(m)),
                    score: score as f32,
                    start_line,
                    end_line: start_line + chunk.len() - 1,
                    text: body,
                })
            })
            .collect();

        // stable sort keeps earlier chunks first on ties
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        hits
    }
}

#[async_trait]
impl SemanticSearch for LineScanSearch {
    async fn search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let content = tokio::fs::read_to_string(&self.log_file_path).await?;
        Ok(self.rank(&content, text, k))
    }
}

/// Lowercased alphanumeric terms of at least 3 characters
fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    text: String,
    #[serde(default)]
    k: Option<usize>,
}

/// The `query_tool` registry entry
pub struct SemanticSearchTool {
    backend: Arc<dyn SemanticSearch>,
}

impl SemanticSearchTool {
    pub fn new(backend: Arc<dyn SemanticSearch>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        QUERY_TOOL
    }

    fn description(&self) -> &str {
        "Search the indexed log for chunks similar to `text`. Returns up to `k` chunks (default 3). \
         Use for vague questions or to see examples of a kind of event."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "What to search for"
                },
                "k": {
                    "type": "integer",
                    "description": "Number of chunks to return",
                    "default": DEFAULT_TOP_K
                }
            },
            "required": ["text"]
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<String, ToolError> {
        let args: QueryArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        let k = args.k.unwrap_or(DEFAULT_TOP_K);

        let hits = self
            .backend
            .search(&args.text, k)
            .await
            .map_err(|e| ToolError::Search(e.to_string()))?;
        debug!(query = %args.text, k, hits = hits.len(), "Search finished");

        if hits.is_empty() {
            return Ok(format!("No log chunks matched '{}'.", args.text));
        }

        let rendered: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "[chunk {} | lines {}-{}{}]\n{}",
                    i + 1,
                    hit.start_line,
                    hit.end_line,
                    if hit.has_error { " | has_error" } else { "" },
                    hit.text
                )
            })
            .collect();
        Ok(rendered.join("\n\n"))
    }
}
