//! Computes the on-disk `save_path` for a download and enforces the
//! whitelisted-root containment check before any write touches the
//! filesystem.

use super::sanitize::sanitize_segment;
use std::path::{Path, PathBuf};

/// Computes `save_path` from a download title, its ancestor chain, and the
/// configured target directory.
///
/// `<download_path>/<sanitized ancestor chain>/<sanitized title>` when
/// `preserve_structure` is set, else `<download_path>/<sanitized title>`.
pub fn compute_save_path(
    download_path: &Path,
    ancestor_titles: &[String],
    title: &str,
    preserve_structure: bool,
) -> PathBuf {
    let mut path = download_path.to_path_buf();
    if preserve_structure {
        for ancestor in ancestor_titles {
            path.push(sanitize_segment(ancestor));
        }
    }
    path.push(sanitize_segment(title));
    path
}

/// Returns the set of whitelisted root directories a resolved `save_path`
/// must fall under: the user's home, Downloads, Desktop, Documents, and the
/// application's own XDG data directory.
pub fn whitelisted_roots(app_data_dir: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs_home() {
        roots.push(home.join("Downloads"));
        roots.push(home.join("Desktop"));
        roots.push(home.join("Documents"));
        roots.push(home);
    }
    roots.push(app_data_dir.to_path_buf());
    roots
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// True if `candidate` (once lexically normalized) lies within one of `roots`.
///
/// Both `candidate` and each root are normalized without touching the
/// filesystem (no symlink resolution): `..`/`.` components are collapsed so a
/// traversal attempt like `<root>/../../etc` is rejected even though the
/// path does not yet exist to `canonicalize`.
pub fn is_within_whitelisted_roots(candidate: &Path, roots: &[PathBuf]) -> bool {
    let normalized = normalize_lexically(candidate);
    roots
        .iter()
        .map(|r| normalize_lexically(r))
        .any(|root| normalized.starts_with(&root))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_layout_without_preserve_structure() {
        let p = compute_save_path(Path::new("/tmp/downloads"), &["a".into(), "b".into()], "file.bin", false);
        assert_eq!(p, PathBuf::from("/tmp/downloads/file.bin"));
    }

    #[test]
    fn mirrors_ancestor_chain_when_preserving_structure() {
        let p = compute_save_path(
            Path::new("/tmp/downloads"),
            &["Debian".into(), "12".into()],
            "file.iso",
            true,
        );
        assert_eq!(p, PathBuf::from("/tmp/downloads/Debian/12/file.iso"));
    }

    #[test]
    fn sanitizes_every_segment() {
        let p = compute_save_path(
            Path::new("/tmp/downloads"),
            &["a/b".into()],
            "c:d".into(),
            true,
        );
        assert_eq!(p, PathBuf::from("/tmp/downloads/a_b/c_d"));
    }

    #[test]
    fn rejects_traversal_outside_roots() {
        let roots = vec![PathBuf::from("/home/user/Downloads")];
        let traversal = PathBuf::from("/home/user/Downloads/../../etc/passwd");
        assert!(!is_within_whitelisted_roots(&traversal, &roots));
    }

    #[test]
    fn accepts_path_under_root() {
        let roots = vec![PathBuf::from("/home/user/Downloads")];
        let ok = PathBuf::from("/home/user/Downloads/sub/file.bin");
        assert!(is_within_whitelisted_roots(&ok, &roots));
    }
}
