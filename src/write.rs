//! C7 — the write path. Every document/task/plan/session mutation is
//! mediated here under the path-safety, read-only, auto-numbering, and
//! atomic-rename invariants in the specification.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::indexer::Orchestrator;
use crate::models::TaskStatus;
use crate::paths::resolve_under_root;
use crate::webhook::WebhookDispatcher;

pub struct Writer {
    root: PathBuf,
    orchestrator: Arc<Orchestrator>,
    webhooks: Option<Arc<WebhookDispatcher>>,
    read_only: bool,
}

pub const PROJECT_FOLDERS: &[&str] = &[
    "tasks", "plans", "sessions", "reports", "changelog", "references", "scratch", "assets",
];

#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task_number: u32,
    pub filename: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub previous: Option<String>,
    pub new: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
}

impl Writer {
    pub fn new(
        root: PathBuf,
        orchestrator: Arc<Orchestrator>,
        webhooks: Option<Arc<WebhookDispatcher>>,
        read_only: bool,
    ) -> Self {
        Self { root, orchestrator, webhooks, read_only }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(CoreError::PermissionDenied(
                "server is running in read-only mode".into(),
            ));
        }
        Ok(())
    }

    fn fire(&self, event_type: &str, project: Option<&str>, data: serde_json::Value) {
        if let Some(webhooks) = &self.webhooks {
            webhooks.fire_event(event_type, project, data);
        }
    }

    async fn refresh(&self, abs: &Path) -> Result<()> {
        self.orchestrator.refresh_file(abs).await
    }

    fn atomic_create(&self, path: &Path, content: &str) -> Result<()> {
        if path.exists() {
            return Err(CoreError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = sibling_tmp(path);
        std::fs::write(&tmp, content)?;
        // Re-check immediately before the rename: another writer may have
        // created the destination between our check above and now.
        if path.exists() {
            let _ = std::fs::remove_file(&tmp);
            return Err(CoreError::Conflict(format!(
                "{} appeared concurrently",
                path.display()
            )));
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn atomic_overwrite(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = sibling_tmp(path);
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    #[instrument(skip(self, content))]
    pub async fn create_document(
        &self,
        project: &str,
        folder: &str,
        filename: &str,
        content: &str,
    ) -> Result<(String, PathBuf)> {
        self.ensure_writable()?;
        let filename = ensure_md(filename);
        let (abs, relative) = resolve_under_root(&self.root, project, folder, &filename)?;

        self.atomic_create(&abs, content)?;
        self.refresh(&abs).await?;
        self.fire(
            "doc.created",
            Some(project),
            json!({"relative_path": relative}),
        );
        Ok((relative, abs))
    }

    /// `create_doc` is the same operation under the corpus's other spelling
    /// of the tool name; the transport layer decides which name to expose.
    pub async fn create_doc(
        &self,
        project: &str,
        folder: &str,
        filename: &str,
        content: &str,
    ) -> Result<(String, PathBuf)> {
        self.create_document(project, folder, filename, content).await
    }

    #[instrument(skip(self, content))]
    pub async fn update_document(
        &self,
        project: &str,
        relative_path: &str,
        content: &str,
    ) -> Result<String> {
        self.ensure_writable()?;
        let (folder, filename) = split_folder_filename(relative_path)?;
        let (abs, _relative) = resolve_under_root(&self.root, project, &folder, &filename)?;

        if !abs.exists() {
            return Err(CoreError::NotFound(relative_path.to_string()));
        }

        self.atomic_overwrite(&abs, content)?;
        self.refresh(&abs).await?;

        let hash = crate::indexer::walker::hex_sha256(content.as_bytes());
        self.fire(
            "doc.updated",
            Some(project),
            json!({"relative_path": relative_path}),
        );
        Ok(hash)
    }

    #[instrument(skip(self, objective, steps))]
    pub async fn create_task(
        &self,
        project: &str,
        title: &str,
        objective: &str,
        steps: Option<&[String]>,
        feature: Option<&str>,
    ) -> Result<CreatedTask> {
        self.ensure_writable()?;

        let task_number = self.next_task_number(project)?;
        let slug = slugify(title);
        let filename = format!("{:03}-{}.md", task_number, slug);

        let mut content = String::new();
        if let Some(feature) = feature {
            content.push_str("---\n");
            content.push_str("type: task\n");
            content.push_str("status: pending\n");
            content.push_str(&format!("feature: {feature}\n"));
            content.push_str("---\n");
        }
        content.push_str(&format!("# Task: {title}\n\n"));
        content.push_str("Status: pending\n\n");
        content.push_str("## Objective\n");
        content.push_str(objective);
        content.push('\n');
        if let Some(steps) = steps {
            if !steps.is_empty() {
                content.push_str("\n## Steps\n");
                for (i, step) in steps.iter().enumerate() {
                    content.push_str(&format!("{}. [ ] {}\n", i + 1, step));
                }
            }
        }

        let (abs, relative) = resolve_under_root(&self.root, project, "tasks", &filename)?;
        self.atomic_create(&abs, &content)?;
        self.refresh(&abs).await?;
        self.fire(
            "task.created",
            Some(project),
            json!({"relative_path": relative, "task_number": task_number}),
        );

        Ok(CreatedTask { task_number, filename, path: relative })
    }

    fn next_task_number(&self, project: &str) -> Result<u32> {
        static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{3,})-.*\.md$").unwrap());

        let tasks_dir = self.root.join(project).join("tasks");
        let mut max = 0u32;
        if tasks_dir.exists() {
            for entry in std::fs::read_dir(&tasks_dir)? {
                let entry = entry?;
                if let Some(name) = entry.file_name().to_str() {
                    if let Some(caps) = NUMBERED.captures(name) {
                        if let Ok(n) = caps[1].parse::<u32>() {
                            max = max.max(n);
                        }
                    }
                }
            }
        }
        Ok(max + 1)
    }

    #[instrument(skip(self))]
    pub async fn update_task_status(
        &self,
        project: &str,
        task_file: &str,
        new_status: &str,
    ) -> Result<StatusTransition> {
        self.ensure_writable()?;
        let status = TaskStatus::parse(new_status)
            .ok_or_else(|| CoreError::InvalidArgument(format!("invalid status: {new_status}")))?;

        let filename = ensure_md(task_file);
        let (abs, relative) = resolve_under_root(&self.root, project, "tasks", &filename)?;
        if !abs.exists() {
            return Err(CoreError::NotFound(relative));
        }

        let original = std::fs::read_to_string(&abs)?;
        static STATUS_LINE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?m)^Status:\s*\S+\s*$").unwrap());

        let previous = STATUS_LINE
            .find(&original)
            .map(|m| m.as_str().trim_start_matches("Status:").trim().to_string());

        let new_line = format!("Status: {}", status.as_str());
        let updated = if STATUS_LINE.is_match(&original) {
            STATUS_LINE.replace(&original, new_line.as_str()).into_owned()
        } else {
            insert_after_title(&original, &new_line)
        };

        self.atomic_overwrite(&abs, &updated)?;
        self.refresh(&abs).await?;
        self.fire(
            "task.updated",
            Some(project),
            json!({"relative_path": relative, "status": status.as_str()}),
        );

        Ok(StatusTransition { previous, new: status.as_str().to_string() })
    }

    #[instrument(skip(self, content))]
    pub async fn create_plan(
        &self,
        project: &str,
        content: &str,
        filename: Option<&str>,
    ) -> Result<WriteOutcome> {
        self.ensure_writable()?;
        let filename = filename.unwrap_or("execution-plan.md");
        if !filename.ends_with(".md") {
            return Err(CoreError::InvalidArgument(
                "plan filename must end in .md".into(),
            ));
        }

        let (abs, relative) = resolve_under_root(&self.root, project, "plans", filename)?;
        let outcome = if abs.exists() {
            self.atomic_overwrite(&abs, content)?;
            WriteOutcome::Updated
        } else {
            self.atomic_create(&abs, content)?;
            WriteOutcome::Created
        };
        self.refresh(&abs).await?;

        let event = match outcome {
            WriteOutcome::Created => "plan.created",
            WriteOutcome::Updated => "plan.updated",
        };
        self.fire(event, Some(project), json!({"relative_path": relative}));
        Ok(outcome)
    }

    #[instrument(skip(self, content))]
    pub async fn log_session(&self, project: &str, content: &str) -> Result<(WriteOutcome, String)> {
        self.ensure_writable()?;
        let now = Local::now();
        let date = now.format("%Y-%m-%d").to_string();
        let filename = format!("{date}.md");

        let (abs, relative) = resolve_under_root(&self.root, project, "sessions", &filename)?;

        let outcome = if abs.exists() {
            let existing = std::fs::read_to_string(&abs)?;
            let time = now.format("%H:%M:%S").to_string();
            let appended = format!("{existing}\n\n---\n**{time}**\n\n{content}");
            self.atomic_overwrite(&abs, &appended)?;
            WriteOutcome::Updated
        } else {
            let header = format!("# Session Log - {date}\n\n{content}");
            self.atomic_create(&abs, &header)?;
            WriteOutcome::Created
        };
        self.refresh(&abs).await?;
        self.fire(
            "session.logged",
            Some(project),
            json!({"relative_path": relative, "date": date}),
        );

        Ok((outcome, date))
    }

    #[instrument(skip(self))]
    pub async fn reindex(&self) -> Result<usize> {
        // reindex() runs regardless of read-only mode: it mutates only the
        // disposable index, never the filesystem.
        let report = self.orchestrator.full_rebuild().await?;
        self.fire("index.reindexed", None, json!({"document_count": report.document_count}));
        Ok(report.document_count)
    }

    #[instrument(skip(self))]
    pub async fn init_project(&self, project: &str) -> Result<Vec<String>> {
        self.ensure_writable()?;
        // Reuses the shared path-safety validation to reject a malicious
        // project name before any directory is created.
        resolve_under_root(&self.root, project, "tasks", ".gitkeep")?;

        let project_dir = self.root.join(project);
        std::fs::create_dir_all(&project_dir)?;
        for folder in PROJECT_FOLDERS {
            std::fs::create_dir_all(project_dir.join(folder))?;
        }

        let status_path = project_dir.join("status.md");
        if !status_path.exists() {
            let seed = format!(
                "# {project} status\n\n## Current Status\nProject initialized.\n\n## Next\n- \n"
            );
            self.atomic_create(&status_path, &seed)?;
            self.refresh(&status_path).await?;
        }

        self.fire("project.initialized", Some(project), json!({}));
        Ok(PROJECT_FOLDERS.iter().map(|s| s.to_string()).collect())
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    parent.join(format!(".{name}.tmp-{}", Uuid::new_v4()))
}

fn ensure_md(filename: &str) -> String {
    if filename.ends_with(".md") {
        filename.to_string()
    } else {
        format!("{filename}.md")
    }
}

fn split_folder_filename(relative_path: &str) -> Result<(String, String)> {
    // relative_path excludes the project component: `folder/filename`.
    let mut parts = relative_path.splitn(2, '/');
    let folder = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::InvalidArgument("relative_path missing folder".into()))?;
    let filename = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::InvalidArgument("relative_path missing filename".into()))?;
    Ok((folder.to_string(), filename.to_string()))
}

fn slugify(title: &str) -> String {
    let lower = title.to_lowercase();
    let mut slug = String::with_capacity(lower.len());
    let mut last_was_hyphen = true; // suppresses a leading hyphen
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn insert_after_title(original: &str, status_line: &str) -> String {
    match original.find('\n') {
        Some(idx) => {
            let (title_line, rest) = original.split_at(idx + 1);
            format!("{title_line}\n{status_line}\n{rest}")
        }
        None => format!("{original}\n\n{status_line}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    async fn writer() -> (tempfile::TempDir, Writer) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let orch = Arc::new(Orchestrator::new(dir.path().to_path_buf(), store));
        let writer = Writer::new(dir.path().to_path_buf(), orch, None, false);
        (dir, writer)
    }

    #[tokio::test]
    async fn create_task_auto_numbers_and_slugifies() {
        let (_dir, w) = writer().await;
        let created = w
            .create_task("demo", "Add rate limiting", "Per-user", Some(&["a".into(), "b".into()]), None)
            .await
            .unwrap();
        assert_eq!(created.task_number, 1);
        assert_eq!(created.filename, "001-add-rate-limiting.md");

        let second = w
            .create_task("demo", "Second task", "obj", None, None)
            .await
            .unwrap();
        assert_eq!(second.task_number, 2);
    }

    #[tokio::test]
    async fn status_transition_rewrites_single_occurrence() {
        let (_dir, w) = writer().await;
        let created = w.create_task("demo", "X", "obj", None, None).await.unwrap();
        let transition = w
            .update_task_status("demo", &created.filename, "in-progress")
            .await
            .unwrap();
        assert_eq!(transition.previous.as_deref(), Some("pending"));
        assert_eq!(transition.new, "in-progress");

        let abs = w.root.join("demo/tasks").join(&created.filename);
        let content = std::fs::read_to_string(abs).unwrap();
        assert_eq!(content.matches("Status:").count(), 1);
        assert!(content.contains("Status: in-progress"));
    }

    #[tokio::test]
    async fn session_log_appends_with_timestamp() {
        let (_dir, w) = writer().await;
        let (outcome, date) = w.log_session("demo", "first").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Created);

        let (outcome2, _) = w.log_session("demo", "second").await.unwrap();
        assert_eq!(outcome2, WriteOutcome::Updated);

        let abs = w.root.join("demo/sessions").join(format!("{date}.md"));
        let content = std::fs::read_to_string(abs).unwrap();
        assert!(content.starts_with(&format!("# Session Log - {date}")));
        assert!(content.contains("first"));
        assert!(content.contains("---\n**"));
        assert!(content.contains("second"));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected_before_any_write() {
        let (_dir, w) = writer().await;
        let err = w.create_doc("..", "tasks", "x.md", "content").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPath);

        let err2 = w.create_doc("ok", "../etc", "passwd", "x").await.unwrap_err();
        assert_eq!(err2.kind(), crate::error::ErrorKind::InvalidPath);
    }

    #[tokio::test]
    async fn read_only_mode_rejects_writes_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let orch = Arc::new(Orchestrator::new(dir.path().to_path_buf(), store));
        let w = Writer::new(dir.path().to_path_buf(), orch, None, true);

        let err = w.create_doc("demo", "tasks", "x.md", "content").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);
        assert!(!dir.path().join("demo/tasks/x.md").exists());
    }

    #[tokio::test]
    async fn init_project_creates_folder_set_and_seed_status() {
        let (dir, w) = writer().await;
        let folders = w.init_project("demo").await.unwrap();
        assert_eq!(folders.len(), PROJECT_FOLDERS.len());
        for folder in PROJECT_FOLDERS {
            assert!(dir.path().join("demo").join(folder).is_dir());
        }
        assert!(dir.path().join("demo/status.md").exists());
    }
}
