//! C5 — combines the walker, parser, and chunker into a full rebuild and a
//! single-file incremental refresh over the index store.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::{chunker, frontmatter, walker};
use crate::error::{CoreError, Result};
use crate::store::Store;

#[derive(Clone)]
pub struct Orchestrator {
    root: std::path::PathBuf,
    store: Arc<Store>,
}

#[derive(Debug, Clone, Copy)]
pub struct RebuildReport {
    pub document_count: usize,
}

impl Orchestrator {
    pub fn new(root: std::path::PathBuf, store: Arc<Store>) -> Self {
        Self { root, store }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Delete every project (cascading documents/chunks/fts) then reindex
    /// every file discovered under the root. Startup calls this once when
    /// the index holds zero projects.
    #[instrument(skip(self))]
    pub async fn full_rebuild(&self) -> Result<RebuildReport> {
        info!(root = %self.root.display(), "starting full reindex");
        self.store.clear_all().await?;

        if !self.root.exists() {
            return Ok(RebuildReport { document_count: 0 });
        }

        let files = walker::walk(&self.root)?;
        let mut count = 0usize;

        for file in &files {
            match self.index_file(file).await {
                Ok(()) => count += 1,
                Err(e) => warn!(path = %file.relative_path, error = %e, "failed to index file during rebuild"),
            }
        }

        info!(documents = count, "full reindex complete");
        Ok(RebuildReport { document_count: count })
    }

    async fn index_file(&self, file: &crate::models::FileInfo) -> Result<()> {
        let project_id = self
            .store
            .upsert_project(
                &file.project_name,
                &self.root.join(&file.project_name).to_string_lossy(),
            )
            .await?;

        let bytes = std::fs::read(&file.absolute_path)?;
        let parsed = frontmatter::parse(&bytes, &file.relative_path);
        let chunks = chunker::chunk(&parsed.body);

        self.store
            .upsert_document(project_id, file, &parsed.frontmatter, &chunks)
            .await?;
        Ok(())
    }

    /// Refresh a single file, given an absolute path that must resolve under
    /// the root. If the file no longer exists, delete its document row
    /// instead.
    #[instrument(skip(self))]
    pub async fn refresh_file(&self, absolute_path: &Path) -> Result<()> {
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| CoreError::InvalidPath(format!("root does not resolve: {e}")))?;

        if !absolute_path.exists() {
            let relative = absolute_path
                .strip_prefix(&self.root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .map_err(|_| CoreError::InvalidPath("path not under root".into()))?;
            self.store.delete_document(&relative).await?;
            return Ok(());
        }

        let canonical = absolute_path
            .canonicalize()
            .map_err(|e| CoreError::InvalidPath(format!("cannot resolve path: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(CoreError::InvalidPath(
                "path escapes workspace root".into(),
            ));
        }

        let file = walker::file_info(&self.root, absolute_path)?;
        self.index_file(&file).await
    }

    /// Compare mtime first; only when it differs, recompute content_hash to
    /// decide whether the file actually needs reindexing. Used by periodic
    /// sync; the write path always refreshes unconditionally instead.
    pub async fn needs_refresh(&self, absolute_path: &Path) -> Result<bool> {
        let relative = absolute_path
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| CoreError::InvalidPath("path not under root".into()))?;

        let Some(existing) = self.store.get_document(&relative).await? else {
            return Ok(true);
        };

        let metadata = std::fs::metadata(absolute_path)?;
        let mtime = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if mtime == existing.mtime {
            return Ok(false);
        }

        let bytes = std::fs::read(absolute_path)?;
        Ok(walker::hex_sha256(&bytes) != existing.content_hash)
    }
}
