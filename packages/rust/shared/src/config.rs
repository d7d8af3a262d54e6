//! Application configuration for bidsqc.
//!
//! User config lives at `~/.bidsqc/bidsqc.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BidsQcError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bidsqc.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bidsqc";

/// Environment variable TemplateFlow uses for its local cache root.
const TEMPLATEFLOW_HOME_ENV: &str = "TEMPLATEFLOW_HOME";

// ---------------------------------------------------------------------------
// Config structs (matching bidsqc.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reference template download settings.
    #[serde(default)]
    pub templates: TemplatesSection,

    /// External QC report tool settings.
    #[serde(default)]
    pub report: ReportSection,
}

/// `[templates]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesSection {
    /// Base URL of the TemplateFlow archive.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Local cache directory. Falls back to `$TEMPLATEFLOW_HOME`, then
    /// `~/.cache/templateflow`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    /// HTTP timeout for template downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TemplatesSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://templateflow.s3.amazonaws.com".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// `[report]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    /// Program invoked to render QC images.
    #[serde(default = "default_program")]
    pub program: String,

    /// Value passed as `-review_style`.
    #[serde(default = "default_review_style")]
    pub review_style: String,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            review_style: default_review_style(),
        }
    }
}

fn default_program() -> String {
    "apqc_make_tcsh.py".into()
}
fn default_review_style() -> String {
    "pythonic".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (resolved from the config file)
// ---------------------------------------------------------------------------

/// Runtime template client configuration.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Parsed archive base URL.
    pub base_url: Url,
    /// Resolved cache directory.
    pub cache_dir: PathBuf,
    /// Download timeout in seconds.
    pub timeout_secs: u64,
}

impl TryFrom<&AppConfig> for TemplateConfig {
    type Error = BidsQcError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let section = &config.templates;
        let base_url = Url::parse(&section.base_url).map_err(|e| {
            BidsQcError::config(format!("invalid templates.base_url '{}': {e}", section.base_url))
        })?;

        let cache_dir = match &section.cache_dir {
            Some(dir) => expand_home(dir),
            None => default_template_cache()?,
        };

        Ok(Self {
            base_url,
            cache_dir,
            timeout_secs: section.timeout_secs,
        })
    }
}

/// Runtime report tool configuration.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Program to execute.
    pub program: String,
    /// Review style passed to the program.
    pub review_style: String,
}

impl From<&AppConfig> for ReportConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            program: config.report.program.clone(),
            review_style: config.report.review_style.clone(),
        }
    }
}

/// Resolve the TemplateFlow cache the same way TemplateFlow itself does.
fn default_template_cache() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(TEMPLATEFLOW_HOME_ENV) {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }
    let cache = dirs::cache_dir()
        .ok_or_else(|| BidsQcError::config("could not determine cache directory"))?;
    Ok(cache.join("templateflow"))
}

/// Expand a leading `~/` against the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bidsqc/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BidsQcError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bidsqc/bidsqc.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BidsQcError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BidsQcError::config(format!("failed to parse {}: {e}", path.display())))
}
