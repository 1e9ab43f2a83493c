//! Path containment checks for files referenced by configuration.
//!
//! Scripts and playbooks named in host documents are resolved against the
//! project root and must stay inside it. The check runs twice: lexically,
//! before touching the filesystem, and on canonical paths so that a symlink
//! cannot lead outside the root either.

use anyhow::{Context, Result, anyhow};
use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path, resolving `.` and `..` components.
///
/// Returns `None` when `..` would climb above the start of the path.
///
/// ```rust
/// use provisor_cli::utils::path_validation::normalize_path;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(normalize_path(Path::new("/srv/a/./b/../c")), Some(PathBuf::from("/srv/a/c")));
/// assert_eq!(normalize_path(Path::new("a/../../b")), None);
/// ```
#[must_use]
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut components: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                _ => return None,
            },
            c => components.push(c),
        }
    }

    Some(components.iter().collect())
}

/// Join `path` onto `root` and check that the result stays inside `root`.
///
/// A relative root is taken from the current directory. Absolute paths are
/// accepted when they point inside the root. Returns the normalized path, or
/// `None` when it escapes.
#[must_use]
pub fn contained_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let root = normalize_path(&std::path::absolute(root).ok()?)?;
    let candidate = normalize_path(&root.join(path))?;
    candidate.starts_with(&root).then_some(candidate)
}

/// Validates that an existing path is within project boundaries after
/// following symlinks.
///
/// # Errors
///
/// Returns an error if either path cannot be canonicalized or the path
/// escapes the project directory.
pub fn validate_project_path(path: &Path, project_dir: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", path.display()))?;
    let project_canonical = project_dir
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", project_dir.display()))?;

    if !canonical.starts_with(&project_canonical) {
        return Err(anyhow!("Path '{}' escapes project directory", path.display()));
    }

    Ok(canonical)
}
