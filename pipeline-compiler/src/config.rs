// Compiler Configuration
// `pipec.toml` loading, discovery and environment overrides

use crate::policy::{RuleError, RuleSet, RuleSpec};
use crate::template::{FileSystemLoader, MAX_TEMPLATE_DEPTH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "pipec.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("invalid value for {name}: '{value}'")]
    Env { name: String, value: String },
}

/// Settings shared by every compile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Root for `/`-rooted and repository-relative template references
    pub repo_root: PathBuf,

    /// Template every pipeline must be compiled through
    pub required_template: Option<String>,

    pub max_depth: usize,

    /// Resource repositories for `path@alias` references
    pub resources: IndexMap<String, PathBuf>,

    /// Extra rules file (YAML)
    pub policy: Option<PathBuf>,

    pub rules: Vec<RuleSpec>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            required_template: None,
            max_depth: MAX_TEMPLATE_DEPTH,
            resources: IndexMap::new(),
            policy: None,
            rules: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load a config file. Relative paths inside it are resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        tracing::debug!(path = %path.display(), rules = config.rules.len(), "loaded configuration");
        Ok(config)
    }

    /// Find `pipec.toml` in `start` or any of its ancestors.
    pub fn discover(start: &Path) -> Result<Option<(PathBuf, Self)>, ConfigError> {
        for dir in start.ancestors() {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok(Some((candidate, config)));
            }
        }
        Ok(None)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &PathBuf| if p.is_absolute() { p.clone() } else { base.join(p) };
        self.repo_root = resolve(&self.repo_root);
        for path in self.resources.values_mut() {
            *path = resolve(path);
        }
        self.policy = self.policy.as_ref().map(resolve);
    }

    /// Apply `PIPEC_REQUIRED_TEMPLATE` and `PIPEC_MAX_DEPTH` from the
    /// environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(template) = lookup("PIPEC_REQUIRED_TEMPLATE") {
            self.required_template = Some(template).filter(|t| !t.is_empty());
        }

        if let Some(value) = lookup("PIPEC_MAX_DEPTH") {
            self.max_depth = value.parse().map_err(|_| ConfigError::Env {
                name: "PIPEC_MAX_DEPTH".to_string(),
                value,
            })?;
        }
        Ok(())
    }

    pub fn loader(&self) -> FileSystemLoader {
        self.resources
            .iter()
            .fold(FileSystemLoader::new(&self.repo_root), |loader, (alias, path)| {
                loader.with_resource(alias.clone(), path.clone())
            })
    }

    /// Inline rules followed by the rules of the policy file, if any.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        let mut rules = RuleSet::from_specs(&self.rules)?;
        if let Some(path) = &self.policy {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            rules.extend_specs(&RuleSpec::from_yaml(&content)?)?;
        }
        Ok(rules)
    }
}
