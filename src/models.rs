//! Row types shared by the index store, search engine, write path, and
//! resource assembler.

use serde::{Deserialize, Serialize};

/// `(pending|in-progress|done|blocked)` — the only status values the write
/// path will accept for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in-progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub absolute_path: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub last_updated: Option<i64>,
    pub open_task_count: i64,
    pub last_session_date: Option<String>,
    pub file_counts: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub name: String,
    pub file_counts: Vec<(String, i64)>,
    pub task_status_counts: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: i64,
    pub project_id: i64,
    pub relative_path: String,
    pub folder: String,
    pub filename: String,
    #[sqlx(rename = "doc_type")]
    pub doc_type: String,
    pub status: Option<String>,
    pub owner: Option<String>,
    /// JSON array of lower-cased tags, stored as TEXT.
    pub tags: String,
    pub feature: Option<String>,
    pub content_hash: String,
    pub mtime: i64,
    pub updated: Option<String>,
    pub indexed_at: i64,
}

impl DocumentRow {
    pub fn tags_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChunkRow {
    pub id: i64,
    pub document_id: i64,
    pub heading: Option<String>,
    pub heading_level: i64,
    pub content: String,
    pub chunk_order: i64,
    pub char_offset: i64,
    pub is_priority_heading: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub project: String,
    pub relative_path: String,
    pub folder: String,
    pub heading: Option<String>,
    pub snippet: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: i64,
    pub url: String,
    /// Never serialized into listings — callers get the rest of the record.
    #[serde(skip_serializing)]
    pub secret: String,
    pub event_types: Vec<String>,
    pub project: Option<String>,
    pub active: bool,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookLogRow {
    pub id: i64,
    pub subscription_id: i64,
    pub event_type: String,
    pub event_id: String,
    pub payload: String,
    pub status_code: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// File metadata produced by the walker for one discovered document.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub absolute_path: std::path::PathBuf,
    pub relative_path: String,
    pub project_name: String,
    pub folder: String,
    pub filename: String,
    pub mtime: i64,
    pub content_hash: String,
}

/// Parsed frontmatter, with inference already applied by the caller where a
/// field was absent — see [`crate::indexer::frontmatter`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frontmatter {
    pub project: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub updated: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub feature: Option<String>,
}
