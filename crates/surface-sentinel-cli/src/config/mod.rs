//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use surface_sentinel::EngineConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";

/// Resolve the config file path.
///
/// Order: explicit flag, `SENTINEL_CONFIG`, `./.sentinel/config.json`,
/// then `~/.surface-sentinel/config.json`. The returned path may not exist.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(env_path);
    }

    let cwd_config = PathBuf::from(".sentinel/config.json");
    if cwd_config.exists() {
        return cwd_config;
    }

    home_dir().join(".surface-sentinel/config.json")
}

/// Load the engine config at `path`, then apply `SENTINEL_*` overrides.
///
/// A missing file means defaults. A file that exists but does not parse or
/// validate is an error.
pub fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let base = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let config = EngineConfig::from_json(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        tracing::debug!("Loaded config from {}", path.display());
        config
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        EngineConfig::default()
    };

    let config = base.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Directory for the file-backed emergency store.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(home_dir)
        .join("surface-sentinel")
        .join("emergency.json")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}
