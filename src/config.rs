use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use change_indexer_core::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/chix.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_sqlite_backend")]
    pub backend: String,
    /// JSON state file, used when `backend = "json"`.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite_backend(),
            path: default_state_path(),
        }
    }
}

fn default_sqlite_backend() -> String {
    "sqlite".to_string()
}
fn default_state_path() -> PathBuf {
    PathBuf::from("./data/ingest_state.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_sqlite_backend")]
    pub backend: String,
    #[serde(default)]
    pub azure: Option<AzureSearchConfig>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_sqlite_backend(),
            azure: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AzureSearchConfig {
    /// e.g. `https://my-search.search.windows.net`
    pub endpoint: String,
    pub index_name: String,
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
    #[serde(default = "default_vector_field")]
    pub vector_field: String,
    /// Metadata keys projected into their own filterable string fields.
    #[serde(default)]
    pub metadata_fields: Vec<String>,
}

fn default_search_key_env() -> String {
    "AZURE_SEARCH_API_KEY".to_string()
}
fn default_search_api_version() -> String {
    "2023-11-01".to_string()
}
fn default_vector_field() -> String {
    "content_vector".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Defaults per provider: `OPENAI_API_KEY` / `AZURE_OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Texts sent per embeddings request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub azure: Option<AzureOpenAIConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: default_openai_base_url(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            batch_size: default_batch_size(),
            azure: None,
        }
    }
}

fn default_batch_size() -> usize {
    64
}
fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AzureOpenAIConfig {
    pub endpoint: String,
    pub deployment: String,
    #[serde(default = "default_aoai_api_version")]
    pub api_version: String,
}

fn default_aoai_api_version() -> String {
    "2024-02-01".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplyConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub reembed_on_metadata_change: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            reembed_on_metadata_change: false,
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
    pub terraform: Option<TerraformConnectorConfig>,
    pub jsonl: Option<JsonlConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TerraformConnectorConfig {
    /// Output of `terraform show -json <planfile>`.
    #[serde(default)]
    pub plan_path: Option<PathBuf>,
    #[serde(default)]
    pub skip_no_op: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JsonlConnectorConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Defaults only: SQLite state and index under `./data`, embeddings disabled.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            state: StateConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            apply: ApplyConfig::default(),
            retry: RetryPolicy::default(),
            connectors: ConnectorsConfig::default(),
        }
    }

    /// True when either store lives in the SQLite database.
    pub fn uses_sqlite(&self) -> bool {
        self.state.backend == "sqlite" || self.index.backend == "sqlite"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.state.backend.as_str() {
        "sqlite" | "json" => {}
        other => bail!("Unknown state backend: '{}'. Must be sqlite or json.", other),
    }

    match config.index.backend.as_str() {
        "sqlite" => {}
        "azure" => {
            if config.index.azure.is_none() {
                bail!("index.backend = 'azure' requires an [index.azure] section");
            }
        }
        other => bail!("Unknown index backend: '{}'. Must be sqlite or azure.", other),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        "azure_openai" => {
            if config.embedding.azure.is_none() {
                bail!("embedding.provider = 'azure_openai' requires an [embedding.azure] section");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or azure_openai.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    if config.embedding.max_input_chars == 0 {
        bail!("embedding.max_input_chars must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }

    if config.apply.concurrency == 0 {
        bail!("apply.concurrency must be >= 1");
    }

    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }
    if !(config.retry.backoff_multiplier >= 1.0) {
        bail!("retry.backoff_multiplier must be >= 1.0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.state.backend, "sqlite");
        assert_eq!(config.index.backend, "sqlite");
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.apply.concurrency, 4);
        assert_eq!(config.embedding.batch_size, 64);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.uses_sqlite());
    }

    #[test]
    fn full_file_parses() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/x.sqlite"

            [state]
            backend = "json"
            path = "/tmp/state.json"

            [index]
            backend = "azure"

            [index.azure]
            endpoint = "https://example.search.windows.net"
            index_name = "terraform-plans"
            metadata_fields = ["operation", "type"]

            [embedding]
            provider = "azure_openai"
            model = "text-embedding-3-small"
            dims = 1536

            [embedding.azure]
            endpoint = "https://example.openai.azure.com"
            deployment = "embed"

            [apply]
            concurrency = 8
            reembed_on_metadata_change = true

            [retry]
            max_attempts = 3
            base_delay_ms = 250
            backoff_multiplier = 1.5

            [connectors.terraform]
            plan_path = "plan.json"
            skip_no_op = true
            "#,
        )
        .unwrap();
        assert_eq!(config.state.backend, "json");
        assert!(!config.uses_sqlite());
        let azure = config.index.azure.unwrap();
        assert_eq!(azure.api_version, "2023-11-01");
        assert_eq!(azure.vector_field, "content_vector");
        assert_eq!(config.embedding.azure.unwrap().api_version, "2024-02-01");
        assert_eq!(config.apply.concurrency, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert!(config.connectors.terraform.unwrap().skip_no_op);
    }

    #[test]
    fn enabled_provider_needs_dims_and_model() {
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\ndims = 8").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 8").is_ok());
    }

    #[test]
    fn rejects_unknown_backends_and_bad_numbers() {
        assert!(parse("[state]\nbackend = \"redis\"").is_err());
        assert!(parse("[index]\nbackend = \"azure\"").is_err());
        assert!(parse("[embedding]\nprovider = \"cohere\"").is_err());
        assert!(parse("[apply]\nconcurrency = 0").is_err());
        assert!(parse("[embedding]\nbatch_size = 0").is_err());
        assert!(parse("[retry]\nmax_attempts = 0").is_err());
        assert!(parse("[retry]\nbackoff_multiplier = 0.5").is_err());
    }
}
