//! Workspace jail: path validation and symlink-escape detection.
//!
//! Confines agent-driven file and terminal operations to a session's
//! workspace root. Resolution is forgiving for paths that do not exist yet
//! (a terminal's working directory or a file about to be created), falling
//! back to canonicalizing the nearest existing ancestor.

use std::path::{Component, Path, PathBuf};

use crate::{ClientError, Result};

/// Resolve `candidate` against `root`, tolerating non-existent leaves.
///
/// Relative candidates are joined to the root; `.` and `..` segments are
/// folded lexically first so traversal cannot sneak past the existence
/// checks. If the resolved path (or its nearest existing ancestor) is a
/// symlink, the canonicalized target is returned, which lets
/// [`is_within`] catch symlink escapes.
///
/// # Errors
///
/// Returns [`ClientError::PathViolation`] if the workspace root cannot be
/// canonicalized or the candidate escapes past the filesystem root.
pub fn resolve(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let root = canonical_root(root)?;

    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize_lexically(&joined)?;

    canonicalize_forgiving(&normalized)
}

/// Whether `path` sits at or below `root`. Both sides are expected to be
/// already resolved.
#[must_use]
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Resolve `candidate` and enforce the jail boundary.
///
/// With `allow_outside` set, paths outside the root are accepted as long as
/// they resolve; this is the read-only escape configured by
/// [`allow_outside_workspace_reads`](crate::ClientConfig::allow_outside_workspace_reads).
/// Write paths must always be jailed with `allow_outside = false`.
///
/// # Errors
///
/// Returns [`ClientError::PathViolation`] if resolution fails or the path
/// leaves the workspace root while `allow_outside` is unset.
pub fn jail_path(root: &Path, candidate: &Path, allow_outside: bool) -> Result<PathBuf> {
    let canonical_root = canonical_root(root)?;
    let resolved = resolve(root, candidate)?;

    if !allow_outside && !is_within(&resolved, &canonical_root) {
        return Err(ClientError::PathViolation(format!(
            "path {} outside workspace {}",
            resolved.display(),
            canonical_root.display()
        )));
    }

    Ok(resolved)
}

/// Resolve a working directory, clamping anything invalid or out of bounds
/// back to the workspace root.
#[must_use]
pub fn clamp_into(root: &Path, candidate: Option<&Path>, allow_outside: bool) -> PathBuf {
    let fallback = || {
        canonical_root(root).unwrap_or_else(|_| root.to_path_buf())
    };
    match candidate {
        Some(dir) => jail_path(root, dir, allow_outside).unwrap_or_else(|_| fallback()),
        None => fallback(),
    }
}

/// Canonicalize the workspace root itself.
fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .map_err(|err| ClientError::PathViolation(format!("workspace root invalid: {err}")))
}

/// Fold `.` and `..` segments without touching the filesystem.
fn normalize_lexically(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ClientError::PathViolation(
                        "path attempts to escape filesystem root".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                normalized.push(component.as_os_str());
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(normalized)
}

/// Canonicalize `path`, or — when it does not exist — its nearest existing
/// ancestor plus the untouched remainder.
fn canonicalize_forgiving(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .map_err(|err| ClientError::PathViolation(format!("cannot resolve path: {err}")));
    }

    let mut existing = path;
    let mut remainder = Vec::new();
    while !existing.exists() {
        let Some(name) = existing.file_name() else {
            return Err(ClientError::PathViolation(format!(
                "no existing ancestor for {}",
                path.display()
            )));
        };
        remainder.push(name.to_owned());
        existing = existing.parent().ok_or_else(|| {
            ClientError::PathViolation(format!("no existing ancestor for {}", path.display()))
        })?;
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|err| ClientError::PathViolation(format!("cannot resolve ancestor: {err}")))?;
    for name in remainder.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
