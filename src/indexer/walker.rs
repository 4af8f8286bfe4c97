//! C1 — enumerates `.md` files beneath the workspace root and derives
//! `(project, folder, filename)` plus mtime and SHA-256 for each.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{CoreError, Result};
use crate::models::FileInfo;

/// Walk `root`, skipping any path component whose name begins with `.`
/// (a `.git` directory, the index database, dotfiles). Unreadable or
/// non-UTF-8 files are logged and skipped rather than aborting the walk;
/// directory-level I/O errors propagate.
pub fn walk(root: &Path) -> Result<Vec<FileInfo>> {
    let mut out = Vec::new();

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !name.starts_with('.'))
                .unwrap_or(true)
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| CoreError::Io(std::io::Error::other(e.to_string())))?;
        let path = entry.path();

        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }

        match file_info(root, path) {
            Ok(info) => out.push(info),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    Ok(out)
}

/// Compute [`FileInfo`] for a single file known to exist under `root`.
pub fn file_info(root: &Path, path: &Path) -> Result<FileInfo> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| CoreError::InvalidPath(format!("{} is not under root", path.display())))?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    let project_name = parts
        .first()
        .cloned()
        .ok_or_else(|| CoreError::InvalidPath("path has no project component".into()))?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    // `parts` is `[project, filename]` for a file directly under the project
    // root (no folder), or `[project, folder, .., filename]` otherwise.
    let folder = if parts.len() >= 3 {
        parts[1].clone()
    } else {
        String::new()
    };

    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let bytes = std::fs::read(path)?;
    let content_hash = hex_sha256(&bytes);

    Ok(FileInfo {
        absolute_path: path.to_path_buf(),
        relative_path: relative.to_string_lossy().replace('\\', "/"),
        project_name,
        folder,
        filename,
        mtime,
        content_hash,
    })
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable() {
        let a = hex_sha256(b"hello world");
        let b = hex_sha256(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn walk_skips_dotfiles_and_non_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let proj = dir.path().join("demo").join("tasks");
        std::fs::create_dir_all(&proj).unwrap();
        std::fs::write(proj.join("001-a.md"), "# a").unwrap();
        std::fs::write(proj.join("notes.txt"), "ignore me").unwrap();
        let hidden = dir.path().join("demo").join(".git");
        std::fs::create_dir_all(&hidden).unwrap();
        std::fs::write(hidden.join("HEAD.md"), "nope").unwrap();

        let found = walk(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative_path, "demo/tasks/001-a.md");
        assert_eq!(found[0].project_name, "demo");
        assert_eq!(found[0].folder, "tasks");
    }

    #[test]
    fn root_level_file_gets_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        let proj = dir.path().join("demo");
        std::fs::create_dir_all(&proj).unwrap();
        std::fs::write(proj.join("status.md"), "# status").unwrap();

        let found = walk(dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative_path, "demo/status.md");
        assert_eq!(found[0].folder, "");
        assert_eq!(found[0].filename, "status.md");
    }

    #[test]
    fn empty_root_yields_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let found = walk(dir.path()).unwrap();
        assert!(found.is_empty());
    }
}
