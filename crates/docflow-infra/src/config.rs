//! Configuration loader for docflow.
//!
//! Reads `docflow.toml` from the data directory (`~/.docflow/` in production)
//! and deserializes it into [`DocflowConfig`]. Falls back to defaults when
//! the file is missing or malformed, then applies environment overrides for
//! the collaborator endpoints.

use std::path::{Path, PathBuf};

use docflow_types::config::DocflowConfig;

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "docflow.toml";

pub const ENV_OCR_URL: &str = "DOCFLOW_OCR_URL";
pub const ENV_NER_URL: &str = "DOCFLOW_NER_URL";
pub const ENV_PDFIUM_PATH: &str = "DOCFLOW_PDFIUM_PATH";

/// Default data directory: `~/.docflow`, or `./.docflow` without a home.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".docflow")
}

/// Load configuration from `{data_dir}/docflow.toml`.
///
/// - If the file does not exist, returns [`DocflowConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Environment overrides are applied in every case.
///
/// Semantic validation is left to the caller (`DocflowConfig::validate`).
pub async fn load_config(data_dir: &Path) -> DocflowConfig {
    let config = read_config_file(data_dir).await;
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

async fn read_config_file(data_dir: &Path) -> DocflowConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return DocflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return DocflowConfig::default();
        }
    };

    match toml::from_str::<DocflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            DocflowConfig::default()
        }
    }
}

/// Override collaborator endpoints from the environment.
pub fn apply_env_overrides(
    mut config: DocflowConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> DocflowConfig {
    if let Some(url) = lookup(ENV_OCR_URL).filter(|v| !v.is_empty()) {
        config.services.ocr_url = url;
    }
    if let Some(url) = lookup(ENV_NER_URL).filter(|v| !v.is_empty()) {
        config.services.ner_url = url;
    }
    if let Some(path) = lookup(ENV_PDFIUM_PATH).filter(|v| !v.is_empty()) {
        config.services.pdfium_path = Some(PathBuf::from(path));
    }
    config
}

/// Root of the blob store: configured path, or `{data_dir}/blobs`.
pub fn blob_dir(data_dir: &Path, config: &DocflowConfig) -> PathBuf {
    config
        .storage
        .blob_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("blobs"))
}

/// SQLite database file: configured path, or `{data_dir}/docflow.db`.
pub fn database_path(data_dir: &Path, config: &DocflowConfig) -> PathBuf {
    config
        .storage
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join("docflow.db"))
}
