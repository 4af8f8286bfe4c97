//! C6 — composes the store's native FTS5/BM25 ranking with domain-specific
//! boosts and produces highlighted snippets.

use chrono::Utc;
use tracing::instrument;

use crate::error::Result;
use crate::models::SearchResult;
use crate::store::{RawHit, Store};

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub project: Option<String>,
    pub limit: usize,
}

impl SearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self { project: None, limit }
    }
}

const DEFAULT_LIMIT: usize = 20;
/// Over-fetch factor: boosts can reorder bm25's top-N, so the raw FTS query
/// needs headroom beyond the caller's final limit.
const FETCH_FACTOR: i64 = 5;

/// Run `query` (the store's native FTS5 grammar — phrases, `*` prefixes,
/// `AND`/`OR`/`NOT`, `heading:`/`content:` column filters) and return results
/// ordered by composite score, descending, with ties broken by `indexed_at`
/// descending then chunk id ascending (the store already guarantees the
/// latter via `ORDER BY bm25` as a stable secondary key per insertion order;
/// we make the first two explicit below).
#[instrument(skip(store))]
pub async fn search(store: &Store, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
    let limit = if opts.limit == 0 { DEFAULT_LIMIT } else { opts.limit };
    let fetch_limit = (limit as i64) * FETCH_FACTOR;

    let hits = store
        .fts_search(query, opts.project.as_deref(), fetch_limit)
        .await?;

    let mut scored: Vec<(f64, i64, i64, SearchResult)> = hits
        .into_iter()
        .map(|hit| {
            let score = composite_score(&hit);
            let result = SearchResult {
                project: hit.project.clone(),
                relative_path: hit.relative_path.clone(),
                folder: hit.folder.clone(),
                heading: hit.heading.clone(),
                snippet: hit.snippet.clone(),
                score,
            };
            (score, hit.indexed_at, hit.chunk_id, result)
        })
        .collect();

    // Descending score, then descending indexed_at, then ascending chunk id.
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.1.cmp(&a.1))
            .then(a.2.cmp(&b.2))
    });

    scored.truncate(limit);
    Ok(scored.into_iter().map(|(_, _, _, r)| r).collect())
}

fn composite_score(hit: &RawHit) -> f64 {
    // SQLite's bm25() is non-negative, smaller is better. Fold it into a
    // strictly positive relevance measure where larger is better, so
    // multiplying by a boost > 1.0 always increases the score.
    let relevance = 1.0 / (1.0 + hit.bm25.max(0.0));

    relevance * type_boost(hit) * recency_boost(hit) * heading_boost(hit) * status_boost(hit)
}

fn type_boost(hit: &RawHit) -> f64 {
    if hit.folder.is_empty() && hit.filename == "status.md" {
        return 3.0;
    }
    match hit.folder.as_str() {
        "tasks" => 2.0,
        "plans" => 1.8,
        "sessions" => 1.5,
        "changelog" => 1.2,
        "reports" => 1.0,
        "references" => 0.8,
        "scratch" => 0.5,
        "assets" => 0.3,
        _ => 1.0,
    }
}

fn recency_boost(hit: &RawHit) -> f64 {
    let reference_ts = hit
        .updated
        .as_deref()
        .and_then(parse_date_to_unix)
        .unwrap_or(hit.mtime);

    let now = Utc::now().timestamp();
    let age_days = ((now - reference_ts).max(0)) as f64 / 86_400.0;

    if age_days <= 1.0 {
        2.0
    } else if age_days <= 7.0 {
        1.5
    } else if age_days <= 30.0 {
        1.2
    } else if age_days <= 90.0 {
        1.0
    } else {
        0.8
    }
}

fn parse_date_to_unix(s: &str) -> Option<i64> {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

fn heading_boost(hit: &RawHit) -> f64 {
    if hit.is_priority_heading {
        return 2.5;
    }
    if let Some(h) = &hit.heading {
        let lower = h.to_lowercase();
        if lower.contains("objective") || lower.contains("acceptance") {
            return 1.5;
        }
    }
    1.0
}

fn status_boost(hit: &RawHit) -> f64 {
    match hit.status.as_deref() {
        Some("in-progress") => 2.0,
        Some("blocked") => 1.8,
        Some("pending") => 1.2,
        Some("done") => 0.6,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{chunker, frontmatter};
    use crate::models::FileInfo;
    use crate::store::Store;
    use std::sync::Arc;

    fn file(relative_path: &str, folder: &str) -> FileInfo {
        FileInfo {
            absolute_path: std::path::PathBuf::from(relative_path),
            relative_path: relative_path.to_string(),
            project_name: "demo".into(),
            folder: folder.into(),
            filename: "x.md".into(),
            mtime: Utc::now().timestamp(),
            content_hash: "abc".into(),
        }
    }

    #[tokio::test]
    async fn create_and_find_rate_limiting_task() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let project_id = store.upsert_project("demo", "/root/demo").await.unwrap();

        let body = "# Task: Add rate limiting\n\nStatus: pending\n\n## Objective\nPer-user\n";
        let parsed = frontmatter::parse(body.as_bytes(), "demo/tasks/001-add-rate-limiting.md");
        let chunks = chunker::chunk(&parsed.body);
        store
            .upsert_document(
                project_id,
                &file("demo/tasks/001-add-rate-limiting.md", "tasks"),
                &parsed.frontmatter,
                &chunks,
            )
            .await
            .unwrap();

        let opts = SearchOptions { project: Some("demo".into()), limit: 20 };
        let results = search(&store, "rate limiting", &opts).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relative_path, "demo/tasks/001-add-rate-limiting.md");
        assert!(results[0].snippet.contains(">>>"));
    }

    #[tokio::test]
    async fn score_is_monotonically_non_increasing() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let project_id = store.upsert_project("demo", "/root/demo").await.unwrap();

        for i in 0..5 {
            let body = format!("# Doc {i}\n\nalpha beta gamma delta alpha\n");
            let relpath = format!("demo/tasks/{i:03}-x.md");
            let parsed = frontmatter::parse(body.as_bytes(), &relpath);
            let chunks = chunker::chunk(&parsed.body);
            store
                .upsert_document(project_id, &file(&relpath, "tasks"), &parsed.frontmatter, &chunks)
                .await
                .unwrap();
        }

        let opts = SearchOptions::with_limit(20);
        let results = search(&store, "alpha", &opts).await.unwrap();
        assert!(results.len() >= 2);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn invalid_query_syntax_fails() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let opts = SearchOptions::with_limit(20);
        let err = search(&store, "((((", &opts).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
