//! Workspace jail boundary checks: traversal, symlinks, the read-outside
//! escape, and working-directory clamping.

use std::path::Path;

use agent_conduit::workspace::{clamp_into, is_within, jail_path, resolve};
use agent_conduit::ClientError;

#[test]
fn allows_relative_path_inside_workspace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();

    let resolved = jail_path(root, Path::new("src/lib.rs"), false).expect("path valid");

    let canonical_root = root.canonicalize().expect("canonicalize root");
    assert!(resolved.starts_with(&canonical_root));
    assert!(resolved.ends_with("src/lib.rs"));
}

#[test]
fn allows_nonexistent_leaf() {
    let temp = tempfile::tempdir().expect("tempdir");

    let resolved =
        jail_path(temp.path(), Path::new("new_dir/new_file.txt"), false).expect("path valid");

    assert!(resolved.ends_with("new_dir/new_file.txt"));
}

#[test]
fn rejects_parent_traversal() {
    let temp = tempfile::tempdir().expect("tempdir");

    let result = jail_path(temp.path(), Path::new("../secret.txt"), false);

    assert!(matches!(result, Err(ClientError::PathViolation(_))));
}

#[test]
fn rejects_traversal_through_subdirectory() {
    let temp = tempfile::tempdir().expect("tempdir");

    let result = jail_path(temp.path(), Path::new("src/../../escape.txt"), false);

    assert!(matches!(result, Err(ClientError::PathViolation(_))));
}

#[test]
fn rejects_absolute_path_outside_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    let target = outside.path().join("other.txt");

    let result = jail_path(temp.path(), &target, false);

    assert!(matches!(result, Err(ClientError::PathViolation(_))));
}

#[test]
fn allow_outside_admits_external_absolute_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    let target = outside.path().join("other.txt");

    let resolved = jail_path(temp.path(), &target, true).expect("path admitted");

    assert!(resolved.ends_with("other.txt"));
}

#[test]
fn folds_dot_segments() {
    let temp = tempfile::tempdir().expect("tempdir");

    let resolved = jail_path(temp.path(), Path::new("./src/./main.rs"), false).expect("path valid");

    assert!(resolved.ends_with("src/main.rs"));
}

#[cfg(unix)]
#[test]
fn rejects_symlink_escape() {
    use std::os::unix::fs::symlink;

    let temp = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    std::fs::write(outside.path().join("secret.txt"), "top secret").expect("write");
    symlink(outside.path(), temp.path().join("link")).expect("symlink");

    let result = jail_path(temp.path(), Path::new("link/secret.txt"), false);

    assert!(matches!(result, Err(ClientError::PathViolation(_))));
}

#[cfg(unix)]
#[test]
fn symlink_escape_allowed_for_reads_when_configured() {
    use std::os::unix::fs::symlink;

    let temp = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    std::fs::write(outside.path().join("secret.txt"), "readable").expect("write");
    symlink(outside.path(), temp.path().join("link")).expect("symlink");

    let resolved = jail_path(temp.path(), Path::new("link/secret.txt"), true).expect("admitted");

    assert!(resolved.ends_with("secret.txt"));
}

#[test]
fn resolve_joins_relative_to_root() {
    let temp = tempfile::tempdir().expect("tempdir");

    let resolved = resolve(temp.path(), Path::new("a/b.txt")).expect("resolve");
    let canonical_root = temp.path().canonicalize().expect("canonicalize");

    assert!(is_within(&resolved, &canonical_root));
}

#[test]
fn clamp_falls_back_to_root_for_escaping_cwd() {
    let temp = tempfile::tempdir().expect("tempdir");
    let canonical_root = temp.path().canonicalize().expect("canonicalize");

    let clamped = clamp_into(temp.path(), Some(Path::new("../elsewhere")), false);

    assert_eq!(clamped, canonical_root);
}

#[test]
fn clamp_uses_root_when_no_cwd_given() {
    let temp = tempfile::tempdir().expect("tempdir");
    let canonical_root = temp.path().canonicalize().expect("canonicalize");

    assert_eq!(clamp_into(temp.path(), None, false), canonical_root);
}

#[test]
fn clamp_keeps_valid_subdirectory() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(temp.path().join("sub")).expect("mkdir");

    let clamped = clamp_into(temp.path(), Some(Path::new("sub")), false);

    assert!(clamped.ends_with("sub"));
}
