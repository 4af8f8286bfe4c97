//! C4 — the disk-backed index store. A single SQLite database carries the
//! relational bookkeeping (projects/documents/chunks/webhooks) and an FTS5
//! companion table. Reads run concurrently over a connection pool; writes
//! serialize through one `write_lock` held for the duration of a single
//! transaction, matching the "thread-local connection, one writer" model in
//! the specification.

mod webhook_store;

pub use webhook_store::NewSubscription;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::indexer::chunker::Chunk;
use crate::models::{ChunkRow, DocumentRow, Frontmatter, ProjectDetail, ProjectSummary};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

/// Optional filters for [`Store::list_documents_by`].
#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub project: Option<String>,
    pub folder: Option<String>,
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub feature: Option<String>,
}

/// One chunk row joined with its document and project context — the raw
/// material [`crate::search`] composes boosts over.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub project: String,
    pub relative_path: String,
    pub folder: String,
    pub filename: String,
    pub heading: Option<String>,
    pub is_priority_heading: bool,
    pub status: Option<String>,
    pub updated: Option<String>,
    pub mtime: i64,
    pub indexed_at: i64,
    pub chunk_id: i64,
    /// SQLite's native bm25 (more negative is more relevant).
    pub bm25: f64,
    pub snippet: String,
}

impl Store {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// An ephemeral, unshared in-memory database. Exists for unit and
    /// integration tests; never used by [`crate::server::Server`].
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn check_integrity(&self) -> Result<()> {
        let row: (String,) = sqlx::query_as("PRAGMA integrity_check(1)")
            .fetch_one(&self.pool)
            .await?;
        if row.0 == "ok" {
            Ok(())
        } else {
            Err(CoreError::Corrupt(row.0))
        }
    }

    pub async fn upsert_project(&self, name: &str, absolute_path: &str) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            INSERT INTO projects (name, absolute_path, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(absolute_path)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    /// Replace the document row and all of its chunks atomically. Returns
    /// the document id.
    pub async fn upsert_document(
        &self,
        project_id: i64,
        file: &crate::models::FileInfo,
        frontmatter: &Frontmatter,
        chunks: &[Chunk],
    ) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp();

        let tags_json = serde_json::to_string(&frontmatter.tags).unwrap_or_else(|_| "[]".into());
        let doc_type = frontmatter.doc_type.clone().unwrap_or_default();

        let row = sqlx::query(
            r#"
            INSERT INTO documents
                (project_id, relative_path, folder, filename, doc_type, status,
                 owner, tags, feature, content_hash, mtime, updated, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(relative_path) DO UPDATE SET
                project_id = excluded.project_id,
                folder = excluded.folder,
                filename = excluded.filename,
                doc_type = excluded.doc_type,
                status = excluded.status,
                owner = excluded.owner,
                tags = excluded.tags,
                feature = excluded.feature,
                content_hash = excluded.content_hash,
                mtime = excluded.mtime,
                updated = excluded.updated,
                indexed_at = excluded.indexed_at
            RETURNING id
            "#,
        )
        .bind(project_id)
        .bind(&file.relative_path)
        .bind(&file.folder)
        .bind(&file.filename)
        .bind(&doc_type)
        .bind(&frontmatter.status)
        .bind(&frontmatter.owner)
        .bind(&tags_json)
        .bind(&frontmatter.feature)
        .bind(&file.content_hash)
        .bind(file.mtime)
        .bind(&frontmatter.updated)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let document_id: i64 = row.get("id");

        // Delete old chunks (and their fts rows) before inserting the fresh set.
        let old_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&mut *tx)
            .await?;
        for id in old_ids {
            sqlx::query("DELETE FROM chunks_fts WHERE rowid = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let row = sqlx::query(
                r#"
                INSERT INTO chunks
                    (document_id, heading, heading_level, content, chunk_order,
                     char_offset, is_priority_heading)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(document_id)
            .bind(&chunk.heading)
            .bind(chunk.heading_level as i64)
            .bind(&chunk.content)
            .bind(chunk.chunk_order as i64)
            .bind(chunk.char_offset as i64)
            .bind(chunk.is_priority_heading)
            .fetch_one(&mut *tx)
            .await?;
            let chunk_id: i64 = row.get("id");

            sqlx::query("INSERT INTO chunks_fts (rowid, content, heading) VALUES (?, ?, ?)")
                .bind(chunk_id)
                .bind(&chunk.content)
                .bind(chunk.heading.clone().unwrap_or_default())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(document_id)
    }

    pub async fn delete_document(&self, relative_path: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let doc_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM documents WHERE relative_path = ?")
                .bind(relative_path)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(doc_id) = doc_id {
            let chunk_ids: Vec<i64> =
                sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
                    .bind(doc_id)
                    .fetch_all(&mut *tx)
                    .await?;
            for id in chunk_ids {
                sqlx::query("DELETE FROM chunks_fts WHERE rowid = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("DELETE FROM documents WHERE id = ?")
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete every project row (cascading to documents/chunks/fts), used by
    /// the full rebuild.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM projects").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.project_summary(&name).await?);
        }
        Ok(out)
    }

    async fn project_summary(&self, name: &str) -> Result<ProjectSummary> {
        let project_id: i64 = sqlx::query_scalar("SELECT id FROM projects WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        let last_updated: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(COALESCE(CAST(strftime('%s', updated) AS INTEGER), mtime)) FROM documents WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        let open_task_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE project_id = ? AND folder = 'tasks' AND status IN ('pending', 'in-progress')",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        let last_session_date: Option<String> = sqlx::query_scalar(
            "SELECT filename FROM documents WHERE project_id = ? AND folder = 'sessions' ORDER BY mtime DESC LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        let file_counts = self.folder_counts(project_id).await?;

        Ok(ProjectSummary {
            name: name.to_string(),
            last_updated,
            open_task_count,
            last_session_date,
            file_counts,
        })
    }

    pub async fn get_project(&self, name: &str) -> Result<ProjectDetail> {
        let project_id: i64 = sqlx::query_scalar("SELECT id FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("project {name} not found")))?;

        let file_counts = self.folder_counts(project_id).await?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM documents WHERE project_id = ? AND folder = 'tasks' AND status IS NOT NULL GROUP BY status",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProjectDetail {
            name: name.to_string(),
            file_counts,
            task_status_counts: rows,
        })
    }

    async fn folder_counts(&self, project_id: i64) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT folder, COUNT(*) FROM documents WHERE project_id = ? GROUP BY folder ORDER BY folder",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_documents_by(&self, filter: &DocumentFilter) -> Result<Vec<DocumentRow>> {
        let mut sql = String::from(
            "SELECT d.id, d.project_id, d.relative_path, d.folder, d.filename, d.doc_type, \
             d.status, d.owner, d.tags, d.feature, d.content_hash, d.mtime, d.updated, d.indexed_at \
             FROM documents d JOIN projects p ON p.id = d.project_id WHERE 1=1",
        );
        let mut binds: Vec<String> = Vec::new();

        if let Some(p) = &filter.project {
            sql.push_str(" AND p.name = ?");
            binds.push(p.clone());
        }
        if let Some(f) = &filter.folder {
            sql.push_str(" AND d.folder = ?");
            binds.push(f.clone());
        }
        if let Some(t) = &filter.doc_type {
            sql.push_str(" AND d.doc_type = ?");
            binds.push(t.clone());
        }
        if let Some(s) = &filter.status {
            sql.push_str(" AND d.status = ?");
            binds.push(s.clone());
        }
        if let Some(feat) = &filter.feature {
            sql.push_str(" AND d.feature = ?");
            binds.push(feat.clone());
        }
        sql.push_str(" ORDER BY d.relative_path");

        let mut query = sqlx::query_as::<_, DocumentRow>(&sql);
        for b in binds {
            query = query.bind(b);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    pub async fn get_document(&self, relative_path: &str) -> Result<Option<DocumentRow>> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            "SELECT id, project_id, relative_path, folder, filename, doc_type, status, owner, \
             tags, feature, content_hash, mtime, updated, indexed_at FROM documents WHERE relative_path = ?",
        )
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_chunks(&self, document_id: i64) -> Result<Vec<ChunkRow>> {
        Ok(sqlx::query_as::<_, ChunkRow>(
            "SELECT id, document_id, heading, heading_level, content, chunk_order, char_offset, \
             is_priority_heading FROM chunks WHERE document_id = ? ORDER BY chunk_order",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Run the FTS5 query (already in the store's native grammar) scoped to
    /// `project` if given, returning raw bm25-scored hits for the search
    /// engine to apply boosts to. `fetch_limit` should exceed the caller's
    /// final limit since boosting can reorder the top-N.
    pub async fn fts_search(
        &self,
        query: &str,
        project: Option<&str>,
        fetch_limit: i64,
    ) -> Result<Vec<RawHit>> {
        let mut sql = String::from(
            r#"
            SELECT
                p.name AS project,
                d.relative_path AS relative_path,
                d.folder AS folder,
                d.filename AS filename,
                c.heading AS heading,
                c.is_priority_heading AS is_priority_heading,
                d.status AS status,
                d.updated AS updated,
                d.mtime AS mtime,
                d.indexed_at AS indexed_at,
                c.id AS chunk_id,
                bm25(chunks_fts) AS bm25,
                snippet(chunks_fts, 0, '>>>', '<<<', '...', 64) AS snippet
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            JOIN documents d ON d.id = c.document_id
            JOIN projects p ON p.id = d.project_id
            WHERE chunks_fts MATCH ?
            "#,
        );
        if project.is_some() {
            sql.push_str(" AND p.name = ?");
        }
        sql.push_str(" ORDER BY bm25(chunks_fts) LIMIT ?");

        let mut q = sqlx::query(&sql).bind(query);
        if let Some(p) = project {
            q = q.bind(p);
        }
        q = q.bind(fetch_limit);

        let rows = q.fetch_all(&self.pool).await.map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("fts5: syntax error") => {
                CoreError::InvalidArgument(format!("invalid search query: {}", db.message()))
            }
            _ => CoreError::Database(e),
        })?;

        Ok(rows
            .into_iter()
            .map(|r| RawHit {
                project: r.get("project"),
                relative_path: r.get("relative_path"),
                folder: r.get("folder"),
                filename: r.get("filename"),
                heading: r.get("heading"),
                is_priority_heading: r.get("is_priority_heading"),
                status: r.get("status"),
                updated: r.get("updated"),
                mtime: r.get("mtime"),
                indexed_at: r.get("indexed_at"),
                chunk_id: r.get("chunk_id"),
                bm25: r.get("bm25"),
                snippet: r.get("snippet"),
            })
            .collect())
    }

    pub(crate) fn write_lock(&self) -> Arc<Mutex<()>> {
        self.write_lock.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{chunker, frontmatter};
    use crate::models::FileInfo;

    fn file(relative_path: &str) -> FileInfo {
        FileInfo {
            absolute_path: std::path::PathBuf::from(relative_path),
            relative_path: relative_path.to_string(),
            project_name: "demo".into(),
            folder: "tasks".into(),
            filename: "x.md".into(),
            mtime: 1000,
            content_hash: "abc".into(),
        }
    }

    #[tokio::test]
    async fn upsert_then_search_finds_chunk() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = store.upsert_project("demo", "/root/demo").await.unwrap();

        let body = "# Task: Add rate limiting\n\nStatus: pending\n\n## Objective\nPer-user rate limiting\n";
        let parsed = frontmatter::parse(body.as_bytes(), "demo/tasks/001-x.md");
        let chunks = chunker::chunk(&parsed.body);

        store
            .upsert_document(project_id, &file("demo/tasks/001-x.md"), &parsed.frontmatter, &chunks)
            .await
            .unwrap();

        let hits = store.fts_search("rate", None, 20).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relative_path, "demo/tasks/001-x.md");
    }

    #[tokio::test]
    async fn delete_document_removes_chunks_and_fts() {
        let store = Store::open_in_memory().await.unwrap();
        let project_id = store.upsert_project("demo", "/root/demo").await.unwrap();
        let parsed = frontmatter::parse(b"# T\nbody", "demo/tasks/x.md");
        let chunks = chunker::chunk(&parsed.body);
        store
            .upsert_document(project_id, &file("demo/tasks/x.md"), &parsed.frontmatter, &chunks)
            .await
            .unwrap();

        store.delete_document("demo/tasks/x.md").await.unwrap();

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
        let fts_remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(fts_remaining, 0);
    }

    #[tokio::test]
    async fn invalid_query_syntax_is_invalid_argument() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store.fts_search("(unterminated", None, 20).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
