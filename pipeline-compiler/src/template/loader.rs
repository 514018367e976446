// Template Loaders
// Resolve `template:` references to source text

use crate::template::error::{TemplateError, TemplateErrorKind};

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A loaded template file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTemplate {
    /// Canonical identity, used for cycle detection and as the base for
    /// references made from inside this template
    pub id: String,
    pub source: String,
}

/// Resolves template references.
///
/// `includer` is the id of the template that contains the reference, or
/// `None` for the root document. Relative references are tried against the
/// includer's directory first, then the repository root.
pub trait TemplateLoader: Send + Sync {
    fn load(
        &self,
        reference: &str,
        includer: Option<&str>,
    ) -> Result<LoadedTemplate, TemplateError>;
}

/// Split `path@alias` into its parts.
fn split_alias(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once('@') {
        Some((path, alias)) if !alias.is_empty() && !alias.contains('/') => (path, Some(alias)),
        _ => (reference, None),
    }
}

fn not_found(reference: &str, looked_in: &[PathBuf]) -> TemplateError {
    let locations: Vec<String> = looked_in.iter().map(|p| p.display().to_string()).collect();
    TemplateError::new(
        format!(
            "template '{}' not found (looked in {})",
            reference,
            locations.join(", ")
        ),
        TemplateErrorKind::NotFound,
    )
    .with_path(reference)
}

/// Loads templates from a repository checkout on disk.
///
/// `path@alias` references resolve against the directory registered for
/// `alias` with [`FileSystemLoader::with_resource`].
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    repo_root: PathBuf,
    resources: HashMap<String, PathBuf>,
}

impl FileSystemLoader {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            resources: HashMap::new(),
        }
    }

    /// Add a resource repository for cross-repo template references
    pub fn with_resource(mut self, alias: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.resources.insert(alias.into(), path.into());
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn candidates(
        &self,
        reference: &str,
        includer: Option<&str>,
    ) -> Result<Vec<PathBuf>, TemplateError> {
        let (path, alias) = split_alias(reference);

        if let Some(alias) = alias {
            if alias.eq_ignore_ascii_case("self") {
                return Ok(vec![self.repo_root.join(path.trim_start_matches('/'))]);
            }
            let root = self.resources.get(alias).ok_or_else(|| {
                TemplateError::new(
                    format!(
                        "unknown repository resource '{}' in template reference '{}'",
                        alias, reference
                    ),
                    TemplateErrorKind::NotFound,
                )
                .with_path(reference)
            })?;
            return Ok(vec![root.join(path.trim_start_matches('/'))]);
        }

        if let Some(rooted) = path.strip_prefix('/') {
            return Ok(vec![self.repo_root.join(rooted)]);
        }

        let mut candidates = Vec::new();
        if let Some(dir) = includer.and_then(|id| Path::new(id).parent()) {
            candidates.push(dir.join(path));
        }
        candidates.push(self.repo_root.join(path));
        Ok(candidates)
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(
        &self,
        reference: &str,
        includer: Option<&str>,
    ) -> Result<LoadedTemplate, TemplateError> {
        let candidates = self.candidates(reference, includer)?;
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| not_found(reference, &candidates))?;

        let source = fs::read_to_string(path).map_err(|e| {
            TemplateError::new(
                format!("failed to read template '{}': {}", reference, e),
                TemplateErrorKind::NotFound,
            )
            .with_path(reference)
        })?;

        let id = path
            .canonicalize()
            .unwrap_or_else(|_| path.clone())
            .to_string_lossy()
            .to_string();

        tracing::debug!(template = reference, path = %id, "loaded template");
        Ok(LoadedTemplate { id, source })
    }
}

/// In-memory templates keyed by path, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    templates: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) {
        let path = path.into();
        self.templates.insert(normalize(&path), source.into());
    }
}

impl TemplateLoader for MemoryLoader {
    fn load(
        &self,
        reference: &str,
        includer: Option<&str>,
    ) -> Result<LoadedTemplate, TemplateError> {
        let mut candidates = Vec::new();
        let (path, alias) = split_alias(reference);
        if alias.is_some() || path.starts_with('/') {
            candidates.push(normalize(reference));
        } else {
            if let Some(dir) = includer.and_then(|id| Path::new(id).parent()) {
                candidates.push(normalize(&dir.join(path).to_string_lossy()));
            }
            candidates.push(normalize(path));
        }

        candidates
            .iter()
            .find_map(|key| {
                self.templates.get(key).map(|source| LoadedTemplate {
                    id: key.clone(),
                    source: source.clone(),
                })
            })
            .ok_or_else(|| {
                let looked: Vec<PathBuf> = candidates.iter().map(PathBuf::from).collect();
                not_found(reference, &looked)
            })
    }
}

/// Lexically normalise a `/`-separated path: drop `.`, resolve `..`, strip
/// a leading `/`.
fn normalize(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.join("/")
}
