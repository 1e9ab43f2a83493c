//! Template file discovery and deployment naming.
//!
//! A file is a template when its name carries a marker extension before its
//! final extension (`nginx.tera.conf`, `compose.tpl.yaml`) or ends in
//! `.tera`. Removing the marker yields the deployed file name.

use anyhow::{Result, bail};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::constants::STACKS_FOLDER_NAME;

const TEMPLATE_PATTERN: &str = r"^.*\.(tera|tpl)\..+$|^.+\.tera$";
const MARKER_PATTERN: &str = r"\.(tera|tpl)(\.|$)";

fn template_pattern() -> Result<&'static Regex, regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TEMPLATE_PATTERN)).as_ref().map_err(Clone::clone)
}

fn marker_pattern() -> Result<&'static Regex, regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(MARKER_PATTERN)).as_ref().map_err(Clone::clone)
}

/// Whether a file name follows the template naming convention.
pub fn is_template_file(file_name: &str) -> bool {
    template_pattern().is_ok_and(|re| re.is_match(file_name))
}

/// List template files under `directory`, sorted.
///
/// # Errors
///
/// Fails for absolute directories and unreadable directory trees.
pub fn discover_template_files(directory: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if directory.is_absolute() {
        bail!("Directory must be relative, was given: '{}'", directory.display());
    }

    let mut walker = WalkDir::new(directory).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let pattern = template_pattern()?;
    let mut templates = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        trace!("Checking {}", entry.path().display());
        if pattern.is_match(&file_name) {
            templates.push(entry.path().to_path_buf());
        }
    }

    templates.sort();
    debug!("Discovered {} template(s) in {}", templates.len(), directory.display());
    Ok(templates)
}

/// Strip the template marker from a path's file name.
pub fn remove_template_extensions(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name().map(|name| name.to_string_lossy()) else {
        return path.to_path_buf();
    };
    let stripped = match marker_pattern() {
        Ok(re) => re.replace_all(&file_name, "$2").into_owned(),
        Err(_) => file_name.into_owned(),
    };
    path.with_file_name(stripped)
}

/// Identifier-safe name for a template path.
///
/// A leading dot in the file name becomes `dot-`, dots and path separators
/// become `-`, and anything else outside `[A-Za-z0-9_-]` is dropped.
pub fn id_safe_name(path: &Path) -> String {
    let mut path = path.to_path_buf();
    if let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().into_owned())
        && let Some(rest) = file_name.strip_prefix('.')
    {
        path.set_file_name(format!("dot-{rest}"));
    }

    path.to_string_lossy()
        .chars()
        .map(|c| match c {
            '.' | '/' | '\\' => '-',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Remote deployment path of a template below the local stacks folder.
///
/// `stacks/monitoring/grafana.tera.ini` deploys to
/// `<remote_root>/stacks/monitoring/grafana.ini`.
pub fn remote_target_path(remote_root: &str, stacks_root: &Path, template: &Path) -> Result<String> {
    let Ok(relative) = template.strip_prefix(stacks_root) else {
        bail!(
            "Template {} is not inside the stacks folder {}",
            template.display(),
            stacks_root.display()
        );
    };

    let mut target = format!("{}/{}", remote_root.trim_end_matches('/'), STACKS_FOLDER_NAME);
    for component in remove_template_extensions(relative).components() {
        match component {
            Component::Normal(part) => {
                target.push('/');
                target.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => bail!("Template path {} escapes the stacks folder", template.display()),
        }
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_patterns_compiled_once() {
        assert!(std::ptr::eq(template_pattern().unwrap(), template_pattern().unwrap()));
        assert!(std::ptr::eq(marker_pattern().unwrap(), marker_pattern().unwrap()));
    }

    #[test]
    fn test_template_file_names() {
        assert!(is_template_file("nginx.tera.conf"));
        assert!(is_template_file("compose.tpl.yaml"));
        assert!(is_template_file("compose.yaml.tera"));
        assert!(!is_template_file("nginx.conf"));
        assert!(!is_template_file("tera"));
        assert!(!is_template_file("notes.tera.")); // no final extension
    }

    #[test]
    fn test_remove_template_extensions() {
        assert_eq!(
            remove_template_extensions(Path::new("stacks/web/nginx.tera.conf")),
            PathBuf::from("stacks/web/nginx.conf")
        );
        assert_eq!(
            remove_template_extensions(Path::new("compose.yaml.tera")),
            PathBuf::from("compose.yaml")
        );
    }

    #[test]
    fn test_id_safe_name() {
        assert_eq!(id_safe_name(Path::new("stacks/web/.env.tera")), "stacks-web-dot-env-tera");
        assert_eq!(id_safe_name(Path::new("stacks/web/app config.tera.yml")), "stacks-web-appconfig-tera-yml");
    }

    #[test]
    fn test_remote_target_path() {
        let target = remote_target_path(
            "/etc/provisor/",
            Path::new("stacks"),
            Path::new("stacks/monitoring/grafana.tera.ini"),
        )
        .unwrap();
        assert_eq!(target, "/etc/provisor/stacks/monitoring/grafana.ini");

        assert!(remote_target_path("/etc/provisor", Path::new("stacks"), Path::new("other/x.tera")).is_err());
    }

    #[test]
    fn test_discover_rejects_absolute_directory() {
        let err = discover_template_files(Path::new("/etc"), true).unwrap_err();
        assert!(err.to_string().contains("must be relative"));
    }

    #[test]
    fn test_discover_recursive_and_flat() {
        // discovery only accepts relative directories, so work below the current one
        let cwd = std::env::current_dir().unwrap();
        let temp = tempfile::Builder::new().prefix("discovery-test").tempdir_in(&cwd).unwrap();
        let root = temp.path().strip_prefix(&cwd).unwrap().join("stacks");
        fs::create_dir_all(root.join("web/conf")).unwrap();
        fs::write(root.join("compose.tera.yaml"), "").unwrap();
        fs::write(root.join("README.md"), "").unwrap();
        fs::write(root.join("web/conf/nginx.tera.conf"), "").unwrap();

        let recursive = discover_template_files(&root, true).unwrap();
        assert_eq!(recursive.len(), 2);
        let flat = discover_template_files(&root, false).unwrap();
        assert_eq!(flat.len(), 1);
        assert!(flat[0].ends_with("compose.tera.yaml"));
    }
}
