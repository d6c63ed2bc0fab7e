//! Path validation: cooperative filesystem sandboxing.
//!
//! File tools resolve every argument path through a [`Sandbox`] before
//! touching the disk. Containment is decided on whole path components after
//! symlinks are resolved, so `/work2` is not inside `/work` and a link that
//! points out of the workspace is caught.

use std::path::{Component, Path, PathBuf};
use taskforge_config::SandboxConfig;

/// Error returned when path validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside the workspace")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Empty path")]
    Empty,
}

/// Validate that a path is safe to access.
///
/// Relative paths are taken relative to the first allowed root (or the
/// current directory when there is none). Returns the resolved path.
pub fn validate_path(
    path: &str,
    allowed_roots: &[PathBuf],
    forbidden_paths: &[String],
) -> Result<PathBuf, PathValidationError> {
    if path.trim().is_empty() {
        return Err(PathValidationError::Empty);
    }

    let raw = expand_tilde(path);
    let base = match allowed_roots.first() {
        Some(root) => root.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
    };
    let joined = if raw.is_absolute() { raw } else { base.join(raw) };

    let normalized = normalize(&joined).ok_or_else(|| PathValidationError::PathTraversal {
        path: path.into(),
    })?;
    let resolved = resolve_links(&normalized);

    for pattern in forbidden_paths {
        let forbidden = resolve_links(&expand_tilde(pattern));
        if resolved.starts_with(&forbidden) {
            return Err(PathValidationError::ForbiddenPath {
                path: path.into(),
                pattern: pattern.clone(),
            });
        }
    }

    if !allowed_roots.is_empty() {
        let inside = allowed_roots
            .iter()
            .any(|root| resolved.starts_with(resolve_links(root)));
        if !inside {
            return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
        }
    }

    Ok(resolved)
}

/// Workspace sandbox built from `[sandbox]` settings.
#[derive(Debug, Clone)]
pub struct Sandbox {
    enabled: bool,
    root: PathBuf,
    forbidden: Vec<String>,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, forbidden: Vec<String>) -> Self {
        Self {
            enabled: true,
            root: root.into(),
            forbidden,
        }
    }

    /// No containment; relative paths still resolve against `root`.
    pub fn disabled(root: impl Into<PathBuf>) -> Self {
        Self {
            enabled: false,
            root: root.into(),
            forbidden: Vec::new(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        if config.enabled {
            Self::new(config.root(), config.forbidden_paths.clone())
        } else {
            Self::disabled(config.root())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a tool-supplied path, enforcing containment when enabled.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        if self.enabled {
            return validate_path(path, std::slice::from_ref(&self.root), &self.forbidden);
        }

        if path.trim().is_empty() {
            return Err(PathValidationError::Empty);
        }
        let raw = expand_tilde(path);
        Ok(if raw.is_absolute() { raw } else { self.root.join(raw) })
    }
}

/// Lexically fold `.` and `..`. `None` if `..` climbs above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => return None,
            },
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Canonicalize the deepest existing ancestor and re-append the rest.
///
/// Paths that do not exist yet (a file about to be written) still get their
/// parent's symlinks resolved.
fn resolve_links(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut rest = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_owned());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(home) = home_dir() {
        if path == "~" {
            return home;
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_resolves_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), vec![]);
        let resolved = sandbox.resolve("notes/today.md").unwrap();
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        assert!(resolved.ends_with("notes/today.md"));
    }

    #[test]
    fn traversal_out_of_root_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), vec![]);
        assert!(matches!(
            sandbox.resolve("../../../etc/passwd"),
            Err(PathValidationError::OutsideAllowedRoots { .. })
        ));
    }

    #[test]
    fn traversal_above_filesystem_root_blocked() {
        assert!(matches!(
            validate_path("/../../etc/passwd", &[], &[]),
            Err(PathValidationError::PathTraversal { .. })
        ));
    }

    #[test]
    fn inner_dotdot_that_stays_inside_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), vec![]);
        let resolved = sandbox.resolve("a/../b.txt").unwrap();
        assert!(resolved.ends_with("b.txt"));
    }

    #[test]
    fn absolute_path_outside_root_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path(), vec![]);
        assert!(sandbox.resolve("/etc/hostname").is_err());
    }

    #[test]
    fn sibling_with_common_prefix_is_outside() {
        let parent = tempfile::tempdir().unwrap();
        let work = parent.path().join("work");
        let work2 = parent.path().join("work2");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::create_dir_all(&work2).unwrap();

        let roots = vec![work];
        let target = work2.join("f.txt");
        assert!(validate_path(target.to_str().unwrap(), &roots, &[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_root_blocked() {
        let outside = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let sandbox = Sandbox::new(root.path(), vec![]);
        assert!(matches!(
            sandbox.resolve("link/secret.txt"),
            Err(PathValidationError::OutsideAllowedRoots { .. })
        ));
    }

    #[test]
    fn forbidden_takes_precedence_over_root() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = dir.path().join("secrets");
        let sandbox = Sandbox::new(dir.path(), vec![secrets.to_string_lossy().into_owned()]);
        assert!(matches!(
            sandbox.resolve("secrets/key.pem"),
            Err(PathValidationError::ForbiddenPath { .. })
        ));
        assert!(sandbox.resolve("public/readme.md").is_ok());
    }

    #[test]
    fn forbidden_with_tilde_expansion() {
        let Some(home) = home_dir() else { return };
        let forbidden = vec!["~/.ssh".to_string()];
        let ssh_key = home.join(".ssh/id_rsa");
        assert!(validate_path(ssh_key.to_str().unwrap(), &[], &forbidden).is_err());
    }

    #[test]
    fn disabled_sandbox_only_joins() {
        let sandbox = Sandbox::disabled("/srv/work");
        assert_eq!(sandbox.resolve("a.txt").unwrap(), PathBuf::from("/srv/work/a.txt"));
        assert_eq!(sandbox.resolve("/etc/hosts").unwrap(), PathBuf::from("/etc/hosts"));
        assert!(!sandbox.is_enabled());
    }

    #[test]
    fn empty_path_rejected() {
        assert_eq!(validate_path("  ", &[], &[]), Err(PathValidationError::Empty));
    }
}
