//! C9 — read-only views composed over the index store: project listings,
//! project detail, single-file reads with a metadata block, and the two
//! canned prompt templates.

use std::path::PathBuf;

use serde::Serialize;
use tracing::instrument;

use crate::error::{CoreError, Result};
use crate::models::{ProjectDetail, ProjectSummary};
use crate::store::{DocumentFilter, Store};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub relative_path: String,
    pub doc_type: String,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub tags: Vec<String>,
    pub feature: Option<String>,
    pub updated: Option<String>,
    pub mtime: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub content: String,
    pub metadata: DocumentMetadata,
}

pub struct ResourceAssembler {
    root: PathBuf,
    store: std::sync::Arc<Store>,
}

impl ResourceAssembler {
    pub fn new(root: PathBuf, store: std::sync::Arc<Store>) -> Self {
        Self { root, store }
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.store.list_projects().await
    }

    pub async fn get_project(&self, name: &str) -> Result<ProjectDetail> {
        self.store.get_project(name).await
    }

    /// Shared by `read_doc` and `get_plan`: both variants in the source this
    /// was distilled from return a metadata block, and this specification
    /// mandates it on both — any caller omitting it is a bug.
    #[instrument(skip(self))]
    async fn render_metadata(&self, relative_path: &str) -> Result<DocumentMetadata> {
        let doc = self
            .store
            .get_document(relative_path)
            .await?
            .ok_or_else(|| CoreError::NotFound(relative_path.to_string()))?;

        Ok(DocumentMetadata {
            relative_path: doc.relative_path,
            doc_type: doc.doc_type,
            status: doc.status,
            owner: doc.owner,
            tags: doc.tags_vec(),
            feature: doc.feature,
            updated: doc.updated,
            mtime: doc.mtime,
        })
    }

    #[instrument(skip(self))]
    pub async fn read_doc(&self, relative_path: &str) -> Result<DocumentView> {
        let metadata = self.render_metadata(relative_path).await?;
        let abs = self.root.join(relative_path);
        let content = tokio::fs::read_to_string(&abs)
            .await
            .map_err(|_| CoreError::NotFound(relative_path.to_string()))?;
        Ok(DocumentView { content, metadata })
    }

    /// Same shape as `read_doc`, scoped to `plans/` for callers that only
    /// know the project and plan filename.
    pub async fn get_plan(&self, project: &str, filename: Option<&str>) -> Result<DocumentView> {
        let filename = filename.unwrap_or("execution-plan.md");
        let relative_path = format!("{project}/plans/{filename}");
        self.read_doc(&relative_path).await
    }

    /// "project briefing": status + active tasks + last 2-3 session
    /// summaries + recent decisions.
    #[instrument(skip(self))]
    pub async fn project_briefing(&self, project: &str) -> Result<String> {
        let mut out = String::new();
        out.push_str(&format!("# Project briefing: {project}\n\n"));

        if let Ok(status) = self.read_doc(&format!("{project}/status.md")).await {
            out.push_str("## Current status\n\n");
            out.push_str(&status.content);
            out.push_str("\n\n");
        }

        out.push_str("## Active tasks\n\n");
        let active = self
            .store
            .list_documents_by(&DocumentFilter {
                project: Some(project.to_string()),
                folder: Some("tasks".to_string()),
                status: None,
                doc_type: None,
                feature: None,
            })
            .await?;
        let mut any_active = false;
        for task in &active {
            if matches!(task.status.as_deref(), Some("pending") | Some("in-progress")) {
                any_active = true;
                out.push_str(&format!(
                    "- {} ({})\n",
                    task.relative_path,
                    task.status.as_deref().unwrap_or("unknown")
                ));
            }
        }
        if !any_active {
            out.push_str("- none\n");
        }

        out.push_str("\n## Recent sessions\n\n");
        let mut sessions = self
            .store
            .list_documents_by(&DocumentFilter {
                project: Some(project.to_string()),
                folder: Some("sessions".to_string()),
                status: None,
                doc_type: None,
                feature: None,
            })
            .await?;
        sessions.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        for session in sessions.iter().take(3) {
            out.push_str(&format!("- {}\n", session.relative_path));
        }

        out.push_str("\n## Recent decisions\n\n");
        let decisions = crate::search::search(
            &self.store,
            "heading:decisions",
            &crate::search::SearchOptions { project: Some(project.to_string()), limit: 5 },
        )
        .await
        .unwrap_or_default();
        if decisions.is_empty() {
            out.push_str("- none recorded\n");
        }
        for hit in decisions {
            out.push_str(&format!("- {}: {}\n", hit.relative_path, hit.snippet));
        }

        Ok(out)
    }

    /// "session start": status + execution plan + all in-progress/blocked
    /// tasks + pending summary + latest session.
    #[instrument(skip(self))]
    pub async fn session_start(&self, project: &str) -> Result<String> {
        let mut out = String::new();
        out.push_str(&format!("# Session start: {project}\n\n"));

        if let Ok(status) = self.read_doc(&format!("{project}/status.md")).await {
            out.push_str("## Current status\n\n");
            out.push_str(&status.content);
            out.push_str("\n\n");
        }

        if let Ok(plan) = self.get_plan(project, None).await {
            out.push_str("## Execution plan\n\n");
            out.push_str(&plan.content);
            out.push_str("\n\n");
        }

        let tasks = self
            .store
            .list_documents_by(&DocumentFilter {
                project: Some(project.to_string()),
                folder: Some("tasks".to_string()),
                status: None,
                doc_type: None,
                feature: None,
            })
            .await?;

        out.push_str("## In-progress / blocked tasks\n\n");
        let mut any = false;
        for task in &tasks {
            if matches!(task.status.as_deref(), Some("in-progress") | Some("blocked")) {
                any = true;
                out.push_str(&format!(
                    "- {} ({})\n",
                    task.relative_path,
                    task.status.as_deref().unwrap_or("unknown")
                ));
            }
        }
        if !any {
            out.push_str("- none\n");
        }

        let pending_count = tasks.iter().filter(|t| t.status.as_deref() == Some("pending")).count();
        out.push_str(&format!("\n## Pending summary\n\n{pending_count} task(s) pending.\n\n"));

        let mut sessions = self
            .store
            .list_documents_by(&DocumentFilter {
                project: Some(project.to_string()),
                folder: Some("sessions".to_string()),
                status: None,
                doc_type: None,
                feature: None,
            })
            .await?;
        sessions.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        out.push_str("## Latest session\n\n");
        match sessions.first() {
            Some(latest) => {
                if let Ok(view) = self.read_doc(&latest.relative_path).await {
                    out.push_str(&view.content);
                }
            }
            None => out.push_str("- none recorded\n"),
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Orchestrator;
    use std::sync::Arc;

    async fn assembler() -> (tempfile::TempDir, ResourceAssembler, Arc<Orchestrator>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let orch = Arc::new(Orchestrator::new(dir.path().to_path_buf(), store.clone()));
        let resources = ResourceAssembler::new(dir.path().to_path_buf(), store);
        (dir, resources, orch)
    }

    #[tokio::test]
    async fn read_doc_includes_metadata_block() {
        let (dir, resources, orch) = assembler().await;
        let tasks_dir = dir.path().join("demo/tasks");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(tasks_dir.join("001-x.md"), "# Task: X\n\nStatus: pending\n").unwrap();
        orch.full_rebuild().await.unwrap();

        let view = resources.read_doc("demo/tasks/001-x.md").await.unwrap();
        assert_eq!(view.metadata.status.as_deref(), Some("pending"));
        assert_eq!(view.metadata.doc_type, "task");
        assert!(view.content.contains("# Task: X"));
    }

    #[tokio::test]
    async fn get_plan_defaults_to_execution_plan_filename() {
        let (dir, resources, orch) = assembler().await;
        let plans_dir = dir.path().join("demo/plans");
        std::fs::create_dir_all(&plans_dir).unwrap();
        std::fs::write(plans_dir.join("execution-plan.md"), "# Plan\n").unwrap();
        orch.full_rebuild().await.unwrap();

        let view = resources.get_plan("demo", None).await.unwrap();
        assert!(view.content.contains("# Plan"));
        assert_eq!(view.metadata.relative_path, "demo/plans/execution-plan.md");
    }

    #[tokio::test]
    async fn project_briefing_lists_active_tasks() {
        let (dir, resources, orch) = assembler().await;
        let tasks_dir = dir.path().join("demo/tasks");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(tasks_dir.join("001-x.md"), "# Task: X\n\nStatus: in-progress\n").unwrap();
        std::fs::write(tasks_dir.join("002-y.md"), "# Task: Y\n\nStatus: done\n").unwrap();
        orch.full_rebuild().await.unwrap();

        let briefing = resources.project_briefing("demo").await.unwrap();
        assert!(briefing.contains("001-x.md"));
        assert!(!briefing.contains("002-y.md"));
    }
}
