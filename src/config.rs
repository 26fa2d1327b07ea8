use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default ceiling on the summed size of all documents in one run (15 MiB).
pub const DEFAULT_MAX_CORPUS_BYTES: u64 = 15 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout(),
            max_retries: 0,
            api_key_env: default_api_key_env(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_completion_timeout() -> u64 {
    600
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_corpus_bytes")]
    pub max_corpus_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_corpus_bytes: DEFAULT_MAX_CORPUS_BYTES,
        }
    }
}

fn default_max_corpus_bytes() -> u64 {
    DEFAULT_MAX_CORPUS_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default)]
    pub unpaywall_email: Option<String>,
    #[serde(default = "default_unpaywall_base_url")]
    pub unpaywall_base_url: String,
    #[serde(default = "default_import_timeout")]
    pub timeout_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            unpaywall_email: None,
            unpaywall_base_url: default_unpaywall_base_url(),
            timeout_secs: default_import_timeout(),
        }
    }
}

fn default_unpaywall_base_url() -> String {
    "https://api.unpaywall.org/v2".to_string()
}
fn default_import_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_export_format")]
    pub format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
            format: default_export_format(),
        }
    }
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("./out")
}
fn default_export_format() -> String {
    "both".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl CompletionConfig {
    /// Reads the service credential from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => anyhow::bail!("{} environment variable not set", self.api_key_env),
        }
    }
}

/// Loads and validates a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the built-in defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 1.0]");
    }

    if config.completion.model.trim().is_empty() {
        anyhow::bail!("completion.model must not be empty");
    }

    if config.completion.timeout_secs == 0 {
        anyhow::bail!("completion.timeout_secs must be > 0");
    }

    match config.completion.provider.as_str() {
        "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be gemini or openai.",
            other
        ),
    }

    if config.limits.max_corpus_bytes == 0 {
        anyhow::bail!("limits.max_corpus_bytes must be > 0");
    }

    match config.export.format.as_str() {
        "csv" | "tsv" | "both" => {}
        other => anyhow::bail!(
            "Unknown export format: '{}'. Must be csv, tsv, or both.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_disable_retries_and_cap_corpus() {
        let cfg = Config::default();
        assert_eq!(cfg.completion.temperature, 0.2);
        assert_eq!(cfg.completion.max_retries, 0);
        assert_eq!(cfg.limits.max_corpus_bytes, 15 * 1024 * 1024);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("qca.toml");
        std::fs::write(
            &path,
            "[completion]\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\"\napi_key_env = \"OPENAI_API_KEY\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.completion.provider, "openai");
        assert_eq!(cfg.completion.temperature, 0.2);
        assert_eq!(cfg.export.format, "both");
    }

    #[test]
    fn rejects_unknown_provider() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("qca.toml");
        std::fs::write(&path, "[completion]\nprovider = \"mystery\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("qca.toml");
        std::fs::write(&path, "[completion]\ntemperature = 1.5\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn example_config_parses_to_defaults() {
        let cfg: Config = toml::from_str(include_str!("../config/qca.example.toml")).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:7341");
        assert_eq!(cfg.import.unpaywall_email, None);
        assert_eq!(cfg.limits.max_corpus_bytes, DEFAULT_MAX_CORPUS_BYTES);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.completion.provider, "gemini");
    }

    #[test]
    fn missing_api_key_names_variable() {
        let cfg = CompletionConfig {
            api_key_env: "QCA_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        let err = cfg.api_key().unwrap_err();
        assert!(err.to_string().contains("QCA_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
