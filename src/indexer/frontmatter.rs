//! C2 — extracts optional YAML frontmatter and supplies path-inferred
//! defaults for whatever the frontmatter omits.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::models::Frontmatter;

/// Raw frontmatter fields as the document itself states them — before
/// inference fills in the blanks.
#[derive(Debug, Default, serde::Deserialize)]
struct RawFrontmatter {
    project: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    updated: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    status: Option<String>,
    owner: Option<String>,
    feature: Option<String>,
}

/// `(Frontmatter, body, body_offset)` — body is the file content with the
/// frontmatter block (if any) stripped; body_offset is its starting byte
/// index in the original file.
pub struct ParseOutcome {
    pub frontmatter: Frontmatter,
    pub body: String,
    pub body_offset: usize,
}

/// Parse `bytes` (read as UTF-8 with lossy replacement) for a document whose
/// relative path is `relative_path` (`project/folder/filename`).
pub fn parse(bytes: &[u8], relative_path: &str) -> ParseOutcome {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let (raw, body, body_offset) = split_frontmatter(&text);

    let project = raw
        .as_ref()
        .and_then(|r| r.project.clone())
        .or_else(|| path_component(relative_path, 0));
    let folder = path_component(relative_path, 1).unwrap_or_default();

    let doc_type = raw
        .as_ref()
        .and_then(|r| r.doc_type.clone())
        .unwrap_or_else(|| infer_type(&folder));

    let tags = raw
        .as_ref()
        .map(|r| r.tags.iter().map(|t| t.to_lowercase()).collect())
        .unwrap_or_default();

    let updated = raw.as_ref().and_then(|r| r.updated.clone());
    let owner = raw.as_ref().and_then(|r| r.owner.clone());
    let feature = raw.as_ref().and_then(|r| r.feature.clone());

    // Explicit frontmatter status always wins; otherwise scan the body for
    // tasks, else leave absent.
    let status = raw
        .as_ref()
        .and_then(|r| r.status.clone())
        .or_else(|| {
            if folder == "tasks" {
                infer_task_status(&body)
            } else {
                None
            }
        });

    ParseOutcome {
        frontmatter: Frontmatter {
            project,
            doc_type: Some(doc_type),
            updated,
            tags,
            status,
            owner,
            feature,
        },
        body,
        body_offset,
    }
}

/// Recognize a leading `---\n...\n---\n` block. Anything else — including
/// leading blank lines — is "no frontmatter". Malformed YAML surfaces as a
/// warning and is treated as absent.
fn split_frontmatter(text: &str) -> (Option<RawFrontmatter>, String, usize) {
    if !text.starts_with("---\n") && text != "---" {
        return (None, text.to_string(), 0);
    }
    if !text.starts_with("---\n") {
        return (None, text.to_string(), 0);
    }

    let rest = &text[4..];
    let Some(end) = find_closing_marker(rest) else {
        return (None, text.to_string(), 0);
    };

    let yaml_block = &rest[..end];
    let after = &rest[end..];
    // after starts with "---" followed by newline or EOF; strip that line.
    let body_start_in_after = after
        .find('\n')
        .map(|i| i + 1)
        .unwrap_or(after.len());
    let body = after[body_start_in_after..].to_string();
    let body_offset = 4 + end + body_start_in_after;

    match serde_yaml::from_str::<RawFrontmatter>(yaml_block) {
        Ok(raw) => (Some(raw), body, body_offset),
        Err(e) => {
            warn!(error = %e, "malformed frontmatter YAML, treating as absent");
            (None, text.to_string(), 0)
        }
    }
}

/// Find the index within `s` of a line containing exactly `---`, returning
/// the offset of that line's start (so `s[..idx]` is the YAML block).
fn find_closing_marker(s: &str) -> Option<usize> {
    let mut offset = 0;
    for line in s.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
        if trimmed == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn path_component(relative_path: &str, idx: usize) -> Option<String> {
    relative_path
        .split('/')
        .nth(idx)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// `tasks→task`, `plans→plan`, … per the singularization table; folders the
/// spec doesn't name fall back to the folder name itself.
fn infer_type(folder: &str) -> String {
    match folder {
        "tasks" => "task",
        "plans" => "plan",
        "sessions" => "session",
        "reports" => "report",
        "changelog" => "changelog",
        "references" => "reference",
        "scratch" => "scratch",
        "assets" => "asset",
        other => return other.to_string(),
    }
    .to_string()
}

static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^status:\s*(\w[\w-]*)\s*$").unwrap());

/// Scan the body's first ~10 non-blank lines for `^status:\s*(\w[\w-]*)\s*$`.
fn infer_task_status(body: &str) -> Option<String> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .take(10)
        .find_map(|l| {
            STATUS_LINE
                .captures(l.trim())
                .map(|c| c[1].to_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_frontmatter_when_file_does_not_open_with_marker() {
        let out = parse(b"\n# Title\nbody", "demo/tasks/x.md");
        assert_eq!(out.frontmatter.doc_type.as_deref(), Some("task"));
        assert_eq!(out.body_offset, 0);
    }

    #[test]
    fn parses_recognized_fields() {
        let text = "---\nproject: demo\ntype: task\ntags: [A, B]\nstatus: blocked\n---\nbody text";
        let out = parse(text.as_bytes(), "demo/tasks/001-x.md");
        assert_eq!(out.frontmatter.project.as_deref(), Some("demo"));
        assert_eq!(out.frontmatter.doc_type.as_deref(), Some("task"));
        assert_eq!(out.frontmatter.tags, vec!["a", "b"]);
        assert_eq!(out.frontmatter.status.as_deref(), Some("blocked"));
        assert_eq!(out.body, "body text");
    }

    #[test]
    fn malformed_yaml_is_absent_not_a_failure() {
        let text = "---\n: : not yaml\n---\nbody";
        let out = parse(text.as_bytes(), "demo/tasks/x.md");
        assert_eq!(out.frontmatter.project.as_deref(), Some("demo"));
        assert!(out.body.starts_with("---"));
    }

    #[test]
    fn infers_task_status_from_body() {
        let text = "# Task: X\n\nStatus: in-progress\n\n## Objective\n...";
        let out = parse(text.as_bytes(), "demo/tasks/x.md");
        assert_eq!(out.frontmatter.status.as_deref(), Some("in-progress"));
    }

    #[test]
    fn explicit_frontmatter_status_overrides_body_line() {
        let text = "---\nstatus: done\n---\nStatus: pending\n";
        let out = parse(text.as_bytes(), "demo/tasks/x.md");
        assert_eq!(out.frontmatter.status.as_deref(), Some("done"));
    }
}
