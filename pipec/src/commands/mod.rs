pub mod compile;
pub mod eval;
pub mod validate;

use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;

use pipeline_compiler::{parse, Bindings, Compiler, CompilerConfig};

/// Options shared by commands that compile a pipeline
#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Configuration file (default: nearest pipec.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Additional policy rules (YAML)
    #[arg(long, value_name = "FILE")]
    pub policy: Option<PathBuf>,

    /// Template the pipeline must be compiled through
    #[arg(long, value_name = "TEMPLATE")]
    pub require_template: Option<String>,

    /// Repository root for template references (default: enclosing git repository)
    #[arg(long, value_name = "DIR")]
    pub repo_root: Option<PathBuf>,

    /// Pipeline parameter, value parsed as YAML (repeatable)
    #[arg(short, long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,
}

impl PipelineArgs {
    pub fn read_pipeline(&self) -> Result<String> {
        if !self.pipeline.exists() {
            bail!("Pipeline file not found: {}", self.pipeline.display());
        }
        std::fs::read_to_string(&self.pipeline)
            .wrap_err_with(|| format!("failed to read {}", self.pipeline.display()))
    }

    /// Configuration file, environment and flags, in increasing precedence.
    pub fn config(&self) -> Result<CompilerConfig> {
        let start = self
            .pipeline
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut config = match &self.config {
            Some(path) => CompilerConfig::load(path)?,
            None => match CompilerConfig::discover(&start)? {
                Some((path, config)) => {
                    tracing::debug!(path = %path.display(), "using configuration");
                    config
                }
                None => CompilerConfig {
                    repo_root: find_repo_root(&start).unwrap_or(start),
                    ..CompilerConfig::default()
                },
            },
        };

        config.apply_env_overrides()?;

        if let Some(root) = &self.repo_root {
            config.repo_root = root.clone();
        }
        if let Some(template) = &self.require_template {
            config.required_template = Some(template.clone());
        }
        if let Some(policy) = &self.policy {
            config.policy = Some(policy.clone());
        }
        Ok(config)
    }

    pub fn compiler(&self) -> Result<Compiler> {
        Ok(Compiler::from_config(&self.config()?)?)
    }

    pub fn parameters(&self) -> Result<Bindings> {
        parse_params(&self.params)
    }
}

/// Parse `name=value` pairs. Values are YAML, so `--param count=3` binds a
/// number and `--param 'targets=[a, b]'` a sequence.
pub fn parse_params(params: &[String]) -> Result<Bindings> {
    let mut bindings = Bindings::new();
    for param in params {
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| eyre!("invalid parameter '{}': expected NAME=VALUE", param))?;
        if name.trim().is_empty() {
            bail!("invalid parameter '{}': empty name", param);
        }
        let value = parse(value)
            .map_err(|e| eyre!("invalid value for parameter '{}': {}", name, e))?
            .to_value();
        bindings.insert(name.trim().to_string(), value);
    }
    Ok(bindings)
}

/// Find the root of a git repository by walking up from `start`.
pub fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().ok()?;
    start
        .ancestors()
        .find(|ancestor| ancestor.join(".git").exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_compiler::Value;
    use std::fs;

    #[test]
    fn test_parse_params() {
        let params = vec![
            "configuration=Release".to_string(),
            "count=3".to_string(),
            "targets=[linux, windows]".to_string(),
        ];
        let bindings = parse_params(&params).unwrap();
        assert_eq!(bindings.get("configuration"), Some(&Value::String("Release".to_string())));
        assert_eq!(bindings.get("count"), Some(&Value::Number(3.0)));
        assert_eq!(
            bindings.get("targets"),
            Some(&Value::Array(vec![Value::from("linux"), Value::from("windows")]))
        );
    }

    #[test]
    fn test_parse_params_requires_name() {
        assert!(parse_params(&["novalue".to_string()]).is_err());
        assert!(parse_params(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_find_repo_root_with_git_dir() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir(root.join(".git")).unwrap();
        let sub = root.join("a").join("b");
        fs::create_dir_all(&sub).unwrap();

        let found = find_repo_root(&sub).unwrap();
        assert_eq!(found, root.canonicalize().unwrap());
    }

    #[test]
    fn test_config_flags_override_file() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("pipec.toml"),
            "required_template = \"from-file.yml\"\n",
        )
        .unwrap();
        fs::write(temp.path().join("azure-pipelines.yml"), "steps: []\n").unwrap();

        let args = PipelineArgs {
            pipeline: temp.path().join("azure-pipelines.yml"),
            config: None,
            policy: None,
            require_template: Some("from-flag.yml".to_string()),
            repo_root: None,
            params: Vec::new(),
        };
        let config = args.config().unwrap();
        assert_eq!(config.required_template.as_deref(), Some("from-flag.yml"));
        assert_eq!(config.repo_root, temp.path().join("."));
    }
}
