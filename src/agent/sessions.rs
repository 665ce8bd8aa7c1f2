//! Session transcripts
//!
//! One JSON file per interactive (or one-shot) session, rewritten after every
//! turn so a crash loses at most the turn in flight.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::conversation::Conversation;
use super::orchestrator::{Completion, RunOutcome};

/// Transcript of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// UUIDv7, so ids sort by creation time
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// Log file the session analyzed
    pub log_file: PathBuf,
    /// Model used by the orchestrator
    pub model: String,
    /// Human requests in the order they were asked
    pub requests: Vec<String>,
    /// Full outer conversation
    pub messages: Conversation,
    /// THINK steps across all turns
    pub steps: usize,
    /// Whether the last turn ended with an answer rather than the step limit
    pub complete: bool,
}

impl Session {
    pub fn new(log_file: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        let now = unix_millis();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            created_at_ms: now,
            updated_at_ms: now,
            log_file: log_file.into(),
            model: model.into(),
            requests: Vec::new(),
            messages: Conversation::new(),
            steps: 0,
            complete: false,
        }
    }

    /// Fold a finished turn into the transcript
    pub fn record_turn(&mut self, request: &str, conversation: &Conversation, outcome: &RunOutcome) {
        self.requests.push(request.to_string());
        self.messages = conversation.clone();
        self.steps += outcome.steps;
        self.complete = outcome.completion == Completion::Answered;
        self.updated_at_ms = unix_millis();
    }
}

/// Directory of session transcripts
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn save(&self, session: &Session) -> std::io::Result<PathBuf> {
        let path = self.session_path(&session.id);
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, session_id: &str) -> std::io::Result<Session> {
        load_from_path(&self.session_path(session_id))
    }

    /// Summaries of every readable transcript, newest first
    pub fn list(&self) -> std::io::Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(session) = load_from_path(&path) {
                    sessions.push(SessionSummary {
                        first_request: session
                            .requests
                            .first()
                            .map(|r| truncate(r, 50))
                            .unwrap_or_default(),
                        turns: session.requests.len(),
                        id: session.id,
                        created_at_ms: session.created_at_ms,
                        steps: session.steps,
                        complete: session.complete,
                    });
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(sessions)
    }

    pub fn delete(&self, session_id: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.session_path(session_id))
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", session_id))
    }
}

/// One line of [`SessionStore::list`]
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub first_request: String,
    pub created_at_ms: u64,
    pub turns: usize,
    pub steps: usize,
    pub complete: bool,
}

fn load_from_path(path: &Path) -> std::io::Result<Session> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Truncate to `max_chars` characters, adding an ellipsis if anything was cut
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
