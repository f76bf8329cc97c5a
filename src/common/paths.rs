use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for overlayman.
/// Directories returned here are defaults; the config file may point elsewhere.

/// Get the main overlayman config directory
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("overlayman");
    Ok(config_dir)
}

/// Default location of the configuration file
pub fn default_config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("overlayman.toml"))
}

/// Default storage directory holding overlay working copies
pub fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
            home.join(".local/share")
        })
        .join("overlayman")
}

/// Expand a leading `~` in a configured path
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

/// Make sure a directory exists, creating parents as needed
pub fn ensure_dir(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating directory at {}", dir.display()))
}
