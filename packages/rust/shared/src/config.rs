//! Application configuration for VaultZero.
//!
//! User config lives at `~/.vaultzero/vaultzero.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, VaultZeroError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "vaultzero.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".vaultzero";

// ---------------------------------------------------------------------------
// Config structs (matching vaultzero.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Generation-service settings.
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Peer benchmark corpus settings.
    #[serde(default)]
    pub benchmark: BenchmarkConfig,

    /// Vulnerability feed settings.
    #[serde(default)]
    pub feeds: FeedsConfig,

    /// Orchestrator policy.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory that receives generated reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Also write the final report as JSON.
    #[serde(default = "default_true")]
    pub write_json: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            write_json: true,
        }
    }
}

fn default_output_dir() -> String {
    "./reports".into()
}
fn default_true() -> bool {
    true
}

/// `[anthropic]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the Messages API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used by the analysis stages.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for the executive summary.
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Maximum output tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default)]
    pub temperature: f32,

    /// Upper bound on a single generation call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            summary_model: default_summary_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AnthropicConfig {
    /// Per-call timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_summary_model() -> String {
    "claude-haiku-4-5-20251001".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout() -> u64 {
    120
}

/// `[benchmark]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Path to the peer database.
    #[serde(default = "default_peer_database")]
    pub database: String,

    /// Optional JSON corpus replacing the embedded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,

    /// Number of peers retrieved per run.
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            database: default_peer_database(),
            dataset: None,
            top_k: default_top_k(),
        }
    }
}

fn default_peer_database() -> String {
    "~/.vaultzero/peers.db".into()
}
fn default_top_k() -> u32 {
    3
}

/// `[feeds]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsConfig {
    /// CISA Known Exploited Vulnerabilities feed.
    #[serde(default = "default_kev_url")]
    pub kev_url: String,

    /// How long a fetched catalog is reused.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            kev_url: default_kev_url(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_kev_url() -> String {
    "https://www.cisa.gov/sites/default/files/feeds/known_exploited_vulnerabilities.json".into()
}
fn default_cache_ttl() -> u64 {
    3600
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Abort the run when a strict-JSON stage cannot decode its response.
    #[serde(default)]
    pub halt_on_parse_failure: bool,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.vaultzero/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| VaultZeroError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.vaultzero/vaultzero.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| VaultZeroError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        VaultZeroError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| VaultZeroError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| VaultZeroError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| VaultZeroError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values that would only fail later, deep inside a run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    Url::parse(&config.anthropic.base_url).map_err(|e| {
        VaultZeroError::config(format!(
            "anthropic.base_url '{}' is not a valid URL: {e}",
            config.anthropic.base_url
        ))
    })?;
    Url::parse(&config.feeds.kev_url).map_err(|e| {
        VaultZeroError::config(format!(
            "feeds.kev_url '{}' is not a valid URL: {e}",
            config.feeds.kev_url
        ))
    })?;
    if config.anthropic.request_timeout_secs == 0 {
        return Err(VaultZeroError::config(
            "anthropic.request_timeout_secs must be greater than zero",
        ));
    }
    if config.benchmark.top_k == 0 {
        return Err(VaultZeroError::config("benchmark.top_k must be at least 1"));
    }
    Ok(())
}

/// Check that the generation-service API key env var is set and non-empty,
/// returning its value.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.anthropic.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(VaultZeroError::config(format!(
            "Anthropic API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.benchmark.top_k, 3);
        assert_eq!(parsed.anthropic.api_key_env, "ANTHROPIC_API_KEY");
        assert!(!parsed.pipeline.halt_on_parse_failure);
    }

    #[test]
    fn default_models_are_current() {
        let config = AppConfig::default();
        assert_eq!(config.anthropic.model, "claude-sonnet-4-20250514");
        assert_eq!(config.anthropic.summary_model, "claude-haiku-4-5-20251001");
        assert!(config.anthropic.summary_model.starts_with("claude-"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[anthropic]
model = "claude-opus-4"
temperature = 0.2

[pipeline]
halt_on_parse_failure = true
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.anthropic.model, "claude-opus-4");
        assert_eq!(config.anthropic.max_tokens, 4096);
        assert_eq!(config.anthropic.request_timeout(), Duration::from_secs(120));
        assert!(config.pipeline.halt_on_parse_failure);
        assert!(config.defaults.write_json);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        assert!(validate_config(&config).is_ok());

        config.anthropic.base_url = "not a url".into();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.benchmark.top_k = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.anthropic.api_key_env = "VZ_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/peers.db"), PathBuf::from("/tmp/peers.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/peers.db"), home.join("peers.db"));
        }
    }
}
