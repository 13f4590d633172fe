//! Relative path hardening shared by every backend.
//!
//! Storage paths are always relative to the backend root. Absolute paths and
//! parent-directory segments are rejected outright rather than normalised, so a
//! resolved path can never leave the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{FileStoreError, FileStoreResult};

/// Validate `path` and return its normal segments.
///
/// An empty path (or one made only of `.` segments) denotes the root.
///
/// # Errors
///
/// Returns [`FileStoreError::InvalidPath`] for absolute paths, `..` segments,
/// or platform prefixes.
pub fn sanitize_relative(path: &str) -> FileStoreResult<Vec<String>> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(invalid(path, "absolute_path"));
    }

    let mut segments = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment
                    .to_str()
                    .ok_or_else(|| invalid(path, "not_utf8"))?;
                if segment.contains('\\') {
                    return Err(invalid(path, "backslash_segment"));
                }
                segments.push(segment.to_string());
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid(path, "parent_segment")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid(path, "absolute_path"));
            }
        }
    }
    Ok(segments)
}

/// Resolve `path` beneath `root`.
///
/// # Errors
///
/// Propagates [`sanitize_relative`] rejections.
pub fn resolve_under(root: &Path, path: &str) -> FileStoreResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    resolved.extend(sanitize_relative(path)?);
    Ok(resolved)
}

/// Render `path` relative to `root` with `/` separators.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => segment.to_str(),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn invalid(path: &str, reason: &'static str) -> FileStoreError {
    FileStoreError::InvalidPath {
        path: path.to_string(),
        reason,
    }
}
