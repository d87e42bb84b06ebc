//! Path validation
//!
//! Clients see a virtual tree rooted at `/`, mapped onto the session's root
//! directory. Resolution never climbs above the virtual root.

use std::path::{Component, Path, PathBuf};

/// Resolves `target` against the virtual directory `current`.
///
/// Absolute targets start from `/`. `.` and empty segments are dropped and
/// `..` stops at the root, so the result always stays inside the tree.
pub fn resolve_virtual_path(current: &str, target: &str) -> String {
    let mut segments: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        current.split('/').filter(|s| !s.is_empty()).collect()
    };

    for segment in target.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Maps a resolved virtual path onto the real filesystem under `root`.
pub fn virtual_to_real_path(root: &Path, virtual_path: &str) -> PathBuf {
    let mut real = root.to_path_buf();
    for component in Path::new(virtual_path.trim_start_matches('/')).components() {
        if let Component::Normal(part) = component {
            real.push(part);
        }
    }
    real
}

/// Checks that `path` does not escape `root` once symlinks are resolved.
/// Both paths must exist.
pub async fn is_within_root(root: &Path, path: &Path) -> bool {
    let (Ok(root), Ok(path)) = (
        tokio::fs::canonicalize(root).await,
        tokio::fs::canonicalize(path).await,
    ) else {
        return false;
    };
    path.starts_with(root)
}
