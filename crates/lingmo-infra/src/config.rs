//! Process configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.lingmo/` by default) into
//! [`GatewayFileConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::{Path, PathBuf};

use lingmo_types::config::GatewayFileConfig;

/// Resolve the data directory.
///
/// `LINGMO_DATA_DIR` wins, then `~/.lingmo`, then `./.lingmo`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LINGMO_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".lingmo");
    }

    PathBuf::from(".lingmo")
}

/// Load `{data_dir}/config.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: warning, then defaults.
pub async fn load_file_config(data_dir: &Path) -> GatewayFileConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GatewayFileConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GatewayFileConfig::default();
        }
    };

    match toml::from_str::<GatewayFileConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GatewayFileConfig::default()
        }
    }
}
