use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the instancer configuration directory (~/.instancer)
pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let config_dir = home.join(".instancer");
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Get the settings file path
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.yaml"))
}

/// Get the challenge catalog file path
pub fn get_challenges_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("challenges.yaml"))
}
