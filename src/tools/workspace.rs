//! Path confinement for every filesystem-touching tool.

use std::path::{Path, PathBuf};

use crate::error::AgentError;

/// Canonical root that tool paths must stay inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let root = root.into();
        let canonical_root = root.canonicalize().map_err(|error| {
            AgentError::configuration(format!(
                "failed to resolve workspace root {}: {error}",
                root.display()
            ))
        })?;

        if !canonical_root.is_dir() {
            return Err(AgentError::configuration(format!(
                "workspace root {} must be a directory",
                canonical_root.display()
            )));
        }

        Ok(Self {
            root: canonical_root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a path that must already exist.
    pub fn resolve_existing(&self, path: impl AsRef<Path>) -> Result<PathBuf, String> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let candidate = self.absolute_candidate(path);
        let canonical = candidate
            .canonicalize()
            .map_err(|error| format!("Failed to resolve path {}: {error}", candidate.display()))?;

        self.ensure_inside(&canonical)?;
        Ok(canonical)
    }

    /// Resolves a path that may not exist yet; its nearest existing ancestor
    /// must be inside the workspace.
    pub fn resolve_write(&self, path: impl AsRef<Path>) -> Result<PathBuf, String> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let candidate = self.absolute_candidate(path);
        let parent = candidate.parent().ok_or_else(|| {
            format!(
                "Path {} has no parent directory and cannot be written safely",
                candidate.display()
            )
        })?;

        let anchor = canonicalize_existing_ancestor(parent)?;
        self.ensure_inside(&anchor)?;

        Ok(candidate)
    }

    pub fn ensure_inside(&self, canonical_path: &Path) -> Result<(), String> {
        if canonical_path.starts_with(&self.root) {
            Ok(())
        } else {
            Err(format!(
                "Path escapes workspace root: {}",
                canonical_path.display()
            ))
        }
    }

    pub fn relative_display(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    fn absolute_candidate(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn canonicalize_existing_ancestor(path: &Path) -> Result<PathBuf, String> {
    for ancestor in path.ancestors() {
        if ancestor.exists() {
            return ancestor.canonicalize().map_err(|error| {
                format!("Failed to resolve path {}: {error}", ancestor.display())
            });
        }
    }

    Err(format!(
        "No existing ancestor found for path {}",
        path.display()
    ))
}
