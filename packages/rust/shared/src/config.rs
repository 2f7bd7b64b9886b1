//! Application configuration for Quarry.
//!
//! User config lives at `~/.quarry/quarry.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};
use crate::types::DEFAULT_BUDGET;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "quarry.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".quarry";

// ---------------------------------------------------------------------------
// Config structs (matching quarry.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline sizing and behaviour.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// LLM endpoint settings.
    #[serde(default)]
    pub llm: LlmSettings,

    /// Search backend settings.
    #[serde(default)]
    pub search: SearchSettings,

    /// Page fetcher settings.
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Character budget for any single LLM payload or prompt segment.
    #[serde(default = "default_budget")]
    pub budget: usize,

    /// Extraction/refinement batches in flight at once.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Attempts for each retried LLM call and for whole-extraction retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Maximum number of search results kept per request.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Maximum number of result pages fetched and aggregated.
    #[serde(default = "default_page_fetch_limit")]
    pub page_fetch_limit: usize,

    /// Maximum number of documents rendered into the final prompt.
    #[serde(default = "default_prompt_document_limit")]
    pub prompt_document_limit: usize,

    /// Rerank retrieved results against the original question.
    #[serde(default)]
    pub rerank: bool,

    /// Run fact extraction and refinement before assembling the prompt.
    #[serde(default = "default_true")]
    pub deep: bool,

    /// Routing path used when none is given.
    #[serde(default = "default_path")]
    pub default_path: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_attempts: default_max_attempts(),
            search_limit: default_search_limit(),
            page_fetch_limit: default_page_fetch_limit(),
            prompt_document_limit: default_prompt_document_limit(),
            rerank: false,
            deep: true,
            default_path: default_path(),
        }
    }
}

fn default_budget() -> usize {
    DEFAULT_BUDGET
}
fn default_max_concurrent_tasks() -> usize {
    2
}
fn default_max_attempts() -> usize {
    3
}
fn default_search_limit() -> usize {
    10
}
fn default_page_fetch_limit() -> usize {
    8
}
fn default_prompt_document_limit() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_path() -> String {
    "/searxng".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used for planning, extraction, refinement, and answers.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call HTTP timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_llm_base_url(),
            model: default_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_llm_timeout() -> u64 {
    120
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Base URL of a SearXNG instance with the JSON format enabled.
    #[serde(default = "default_searxng_url")]
    pub searxng_url: String,

    /// Name of the env var holding the Brave Search subscription token.
    #[serde(default = "default_brave_key_env")]
    pub brave_api_key_env: String,

    /// Per-request HTTP timeout for search backends.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            searxng_url: default_searxng_url(),
            brave_api_key_env: default_brave_key_env(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_searxng_url() -> String {
    "http://localhost:8888".into()
}
fn default_brave_key_env() -> String {
    "BRAVE_API_KEY".into()
}
fn default_search_timeout() -> u64 {
    15
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Per-page HTTP timeout.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Allow fetching loopback/private hosts (local testing only).
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Bodies larger than this are treated as failed fetches.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            allow_private_hosts: false,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    20
}
fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, built once per process and passed by reference.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub budget: usize,
    pub max_concurrent_tasks: usize,
    pub max_attempts: usize,
    pub search_limit: usize,
    pub page_fetch_limit: usize,
    pub prompt_document_limit: usize,
    pub rerank: bool,
    pub deep: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            budget: p.budget,
            max_concurrent_tasks: p.max_concurrent_tasks,
            max_attempts: p.max_attempts,
            search_limit: p.search_limit,
            page_fetch_limit: p.page_fetch_limit,
            prompt_document_limit: p.prompt_document_limit,
            rerank: p.rerank,
            deep: p.deep,
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make the pipeline unable to make progress.
    pub fn validate(&self) -> Result<()> {
        if self.budget == 0 {
            return Err(QuarryError::config("pipeline.budget must be greater than zero"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(QuarryError::config(
                "pipeline.max_concurrent_tasks must be greater than zero",
            ));
        }
        if self.max_attempts == 0 {
            return Err(QuarryError::config(
                "pipeline.max_attempts must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.quarry/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| QuarryError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.quarry/quarry.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| QuarryError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| QuarryError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| QuarryError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| QuarryError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| QuarryError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the LLM API key from the configured env var.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(QuarryError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("budget = 28720"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[pipeline]
budget = 1000
rerank = true

[search]
searxng_url = "https://search.example.org"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.budget, 1000);
        assert!(config.pipeline.rerank);
        assert_eq!(config.pipeline.max_concurrent_tasks, 2);
        assert_eq!(config.search.searxng_url, "https://search.example.org");
        assert_eq!(config.llm.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let pipeline = PipelineConfig::from(&AppConfig::default());
        assert_eq!(pipeline.budget, DEFAULT_BUDGET);
        assert_eq!(pipeline.max_concurrent_tasks, 2);
        assert_eq!(pipeline.max_attempts, 3);
        assert_eq!(pipeline.prompt_document_limit, 10);
        assert!(pipeline.deep);
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn zero_budget_is_rejected() {
        let pipeline = PipelineConfig {
            budget: 0,
            ..PipelineConfig::default()
        };
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("budget"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        config.llm.api_key_env = "QUARRY_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn load_config_from_missing_file_is_io_error() {
        let err = load_config_from(Path::new("/definitely/not/here/quarry.toml")).unwrap_err();
        assert!(matches!(err, QuarryError::Io { .. }));
    }
}
