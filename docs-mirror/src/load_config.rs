/// `load_config` module: reads the mirrors config file (JSON or YAML) into a validated
/// [`MirrorsConfig`].
///
/// The format is picked by extension: `.yaml`/`.yml` parse as YAML, anything else as
/// JSON. Both are parsed into a `serde_json::Value` first, so the core sees a single
/// document model and applies the same shape checks and validation to either.
///
/// # Errors
/// All errors use `anyhow::Error` with the config path as context, and are surfaced
/// at the CLI boundary.
use anyhow::{Context, Result};
use docs_mirror_core::config::MirrorsConfig;
use docs_mirror_core::error::ConfigError;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MirrorsConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref)
        .map_err(|source| {
            error!(error = ?source, config_path = ?path_ref, "Failed to read config file");
            ConfigError::Read {
                path: path_ref.to_path_buf(),
                source,
            }
        })
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;

    let is_yaml = path_ref
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let value: serde_json::Value = if is_yaml {
        serde_yaml::from_str(&content).map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            anyhow::anyhow!("Failed to parse config YAML: {e}")
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config JSON");
            anyhow::anyhow!("Failed to parse config JSON: {e}")
        })?
    };

    let config = MirrorsConfig::from_value(value)
        .with_context(|| format!("Invalid mirrors config in {}", path_ref.display()))?;
    info!(config_path = ?path_ref, mirrors = config.mirrors.len(), "Parsed config successfully");
    Ok(config)
}
