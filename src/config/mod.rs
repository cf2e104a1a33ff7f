pub mod types;

use crate::error::{ConfigError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".siem-query.toml";

/// Get the global config file path (~/.siem-query.toml)
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME))
}

/// Get the local config file path (./.siem-query.toml)
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

/// Load configuration from file or use defaults.
///
/// An explicit path must exist and parse. Otherwise the local config in the
/// working directory is tried, then the global one, then defaults.
pub fn load_config(path: Option<&Path>) -> Result<types::Config> {
    if let Some(path) = path {
        return read_config(path);
    }

    if let Ok(cwd) = std::env::current_dir() {
        let local = local_config_path(&cwd);
        if local.exists() {
            return read_config(&local);
        }
    }

    if let Some(global) = global_config_path() {
        if global.exists() {
            return read_config(&global);
        }
    }

    Ok(types::Config::default())
}

fn read_config(path: &Path) -> Result<types::Config> {
    let content = fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| ConfigError::ParsingFailed(format!("{}: {}", path.display(), e)))?;
    log::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}
