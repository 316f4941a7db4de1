use crate::models::{ProjectName, SessionId, SourceInfo};
use anyhow::{bail, Result};
use glob::glob;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const PROJECTS_DIR_NAME: &str = "projects";

/// Handles discovery of data roots and the JSONL sources below them
#[derive(Debug, Clone, Default)]
pub struct FileDiscovery {
    roots: Vec<PathBuf>,
}

impl FileDiscovery {
    /// Resolve data roots. A non-empty `override_dirs` (comma separated,
    /// usually from `CLAUDE_CONFIG_DIR`) replaces the defaults entirely.
    /// Roots without a `projects/` directory are dropped and equivalent
    /// paths are collapsed.
    pub fn resolve(override_dirs: Option<&str>, defaults: &[PathBuf]) -> Result<Self> {
        let overrides: Vec<PathBuf> = override_dirs
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let from_override = !overrides.is_empty();
        let candidates = if from_override { overrides } else { defaults.to_vec() };

        let mut seen = HashSet::new();
        let mut roots = Vec::new();
        for candidate in candidates {
            if !candidate.join(PROJECTS_DIR_NAME).is_dir() {
                debug!(path = %candidate.display(), "Skipping data root without projects directory");
                continue;
            }
            let normalized = candidate.canonicalize().unwrap_or(candidate);
            if seen.insert(normalized.clone()) {
                roots.push(normalized);
            }
        }

        if roots.is_empty() {
            if from_override {
                bail!("No valid data directories found in CLAUDE_CONFIG_DIR");
            }
            bail!("No valid data directories found");
        }

        Ok(Self { roots })
    }

    /// Default roots: `~/.config/claude` then `~/.claude`.
    pub fn default_roots() -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(config) = dirs::config_dir() {
            roots.push(config.join("claude"));
        }
        if let Some(home) = dirs::home_dir() {
            roots.push(home.join(".config").join("claude"));
            roots.push(home.join(".claude"));
        }
        roots
    }

    pub fn from_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// All `.jsonl` files under each root's `projects/` directory, deduplicated
    /// by canonical path and sorted by path. This order is the fixed source
    /// order used for deduplication tie-breaks.
    pub fn find_sources(&self) -> Vec<SourceInfo> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for root in &self.roots {
            let projects_dir = root.join(PROJECTS_DIR_NAME);
            let pattern = projects_dir.join("**").join("*.jsonl");
            let paths = match glob(&pattern.to_string_lossy()) {
                Ok(paths) => paths,
                Err(error) => {
                    warn!(root = %root.display(), error = %error, "Invalid discovery pattern");
                    continue;
                }
            };

            for path in paths {
                let path = match path {
                    Ok(path) => path,
                    Err(error) => {
                        warn!(error = %error, "Unreadable path during discovery");
                        continue;
                    }
                };
                let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
                if seen.insert(canonical) {
                    files.push((path, projects_dir.clone()));
                }
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
            .into_iter()
            .map(|(path, projects_dir)| source_info(path, &projects_dir))
            .collect()
    }
}

/// Build provenance for a file under `projects_dir`: project is the first
/// component below it, session is the file stem.
pub fn source_info(path: PathBuf, projects_dir: &Path) -> SourceInfo {
    let project = path
        .strip_prefix(projects_dir)
        .ok()
        .and_then(|relative| match relative.components().next() {
            Some(Component::Normal(name)) if relative.components().count() > 1 => {
                ProjectName::new(name.to_string_lossy()).ok()
            }
            _ => None,
        });
    let session = path
        .file_stem()
        .and_then(|stem| SessionId::new(stem.to_string_lossy()).ok());

    SourceInfo {
        path,
        project,
        session_id: session,
    }
}
