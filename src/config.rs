use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::converter::DEFAULT_ATTACHMENT_PREFIX;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub redmine: RedmineConfig,
    pub outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedmineConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub path: PathBuf,
    pub projects: Vec<String>,
    #[serde(default)]
    pub include_subprojects: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_ocr_languages")]
    pub ocr_languages: String,
    #[serde(default = "default_attachment_path_prefix")]
    pub attachment_path_prefix: String,
}

fn default_true() -> bool {
    true
}
fn default_ocr_languages() -> String {
    "eng+chi_tra".to_string()
}
fn default_attachment_path_prefix() -> String {
    DEFAULT_ATTACHMENT_PREFIX.to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: default_true(),
            ocr_languages: default_ocr_languages(),
            attachment_path_prefix: default_attachment_path_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "console".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Every configured project identifier, sorted and de-duplicated.
    pub fn all_projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self
            .outputs
            .iter()
            .flat_map(|o| o.projects.iter().cloned())
            .collect();
        projects.sort();
        projects.dedup();
        projects
    }
}

/// Resolve a `${VAR}` reference through `lookup`. Other values pass through.
fn resolve_env_reference(
    value: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => match lookup(var) {
            Some(resolved) if !resolved.is_empty() => Ok(resolved),
            _ => anyhow::bail!("Environment variable {} is not set", var),
        },
        None => Ok(value.to_string()),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, |var| std::env::var(var).ok())
}

fn parse_config(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate redmine
    config.redmine.url = config.redmine.url.trim_end_matches('/').to_string();
    if config.redmine.url.is_empty() {
        anyhow::bail!("redmine.url must not be empty");
    }
    if !(config.redmine.url.starts_with("http://") || config.redmine.url.starts_with("https://"))
    {
        anyhow::bail!("redmine.url must start with http:// or https://");
    }
    config.redmine.api_key = resolve_env_reference(&config.redmine.api_key, env)
        .with_context(|| "Failed to resolve redmine.api_key")?;
    if config.redmine.api_key.is_empty() {
        anyhow::bail!("redmine.api_key must not be empty");
    }
    if config.redmine.timeout_secs == 0 {
        anyhow::bail!("redmine.timeout_secs must be > 0");
    }

    // Validate outputs
    if config.outputs.is_empty() {
        anyhow::bail!("at least one [[outputs]] entry is required");
    }
    for output in &config.outputs {
        if output.projects.is_empty() {
            anyhow::bail!(
                "outputs entry '{}' must list at least one project",
                output.path.display()
            );
        }
    }

    // Validate logging
    match config.logging.level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!(
            "Unknown logging.level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }
    match config.logging.format.as_str() {
        "console" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging.format: '{}'. Must be console or json.",
            other
        ),
    }

    Ok(config)
}
