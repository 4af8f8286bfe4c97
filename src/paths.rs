//! The path-safety hard invariant (specification §4.7): every write, and
//! every read that accepts a project/folder/filename triple, must resolve to
//! a path under the workspace root after symlink resolution.

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

fn validate_component(part: &str, label: &str) -> Result<()> {
    if part.is_empty() {
        return Err(CoreError::InvalidPath(format!("{label} must not be empty")));
    }
    if part.contains('/') || part.contains('\\') {
        return Err(CoreError::InvalidPath(format!(
            "{label} must not contain a path separator: {part:?}"
        )));
    }
    if part == ".." || part == "." {
        return Err(CoreError::InvalidPath(format!(
            "{label} must not be a relative path segment: {part:?}"
        )));
    }
    Ok(())
}

/// Validate `project`/`folder`/`filename`, compose `root + project + folder +
/// filename`, and fully resolve symlinks. Returns the resolved absolute path
/// and the `project/folder/filename` relative path string. The target need
/// not exist yet (creation is resolved against the longest existing
/// ancestor); `root` is created on demand if missing.
pub fn resolve_under_root(
    root: &Path,
    project: &str,
    folder: &str,
    filename: &str,
) -> Result<(PathBuf, String)> {
    validate_component(project, "project")?;
    validate_component(folder, "folder")?;
    validate_component(filename, "filename")?;

    std::fs::create_dir_all(root)?;
    let canonical_root = root
        .canonicalize()
        .map_err(|e| CoreError::InvalidPath(format!("root does not resolve: {e}")))?;

    let lexical = canonical_root.join(project).join(folder).join(filename);
    let resolved = resolve_existing_ancestor(&lexical)?;

    if !resolved.starts_with(&canonical_root) {
        return Err(CoreError::InvalidPath(
            "path escapes workspace root after symlink resolution".into(),
        ));
    }

    let relative = format!("{project}/{folder}/{filename}");
    Ok((resolved, relative))
}

/// Canonicalize the longest existing ancestor of `path`, then rejoin the
/// non-existing suffix lexically (it contains no `..`/`.` by construction —
/// every component was validated above).
fn resolve_existing_ancestor(path: &Path) -> Result<PathBuf> {
    let mut probe = path.to_path_buf();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();

    while !probe.exists() {
        match probe.file_name() {
            Some(name) => suffix.push(name.to_os_string()),
            None => break,
        }
        if !probe.pop() {
            break;
        }
    }

    let mut resolved = probe
        .canonicalize()
        .map_err(|e| CoreError::InvalidPath(format!("cannot resolve path: {e}")))?;
    for part in suffix.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}
