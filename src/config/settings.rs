use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::paths;

/// How instances are scoped: one per team, or one per individual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentMode {
    Team,
    User,
}

/// Global instancer settings stored in ~/.instancer/settings.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `"team"` scopes instances per team; any other value scopes per user.
    #[serde(default = "default_assignment")]
    pub docker_assignment: String,

    /// Keep terminated records as historical rows instead of deleting them.
    #[serde(default)]
    pub retain_terminated: bool,

    /// Memory limit applied to every instance, in megabytes.
    pub container_maxmemory_mb: Option<i64>,

    /// CPU limit applied to every instance, in cores (may be fractional).
    pub container_maxcpu: Option<f64>,

    /// How long a runtime start/stop call may take before it is abandoned.
    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout_secs: u64,

    /// How often the background expiry sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Address the dashboard API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_assignment() -> String {
    "user".to_string()
}

fn default_runtime_timeout() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_bind() -> String {
    "127.0.0.1:8077".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_assignment: default_assignment(),
            retain_terminated: false,
            container_maxmemory_mb: None,
            container_maxcpu: None,
            runtime_timeout_secs: default_runtime_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            bind: default_bind(),
        }
    }
}

impl Settings {
    /// Load settings from disk, creating default if not exists
    pub fn load() -> Result<Self> {
        let settings_path = paths::get_settings_file()?;

        if !settings_path.exists() {
            let settings = Self::default();
            settings.save()?;
            return Ok(settings);
        }

        Self::load_from(&settings_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;

        let settings: Settings =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse settings file")?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let settings_path = paths::get_settings_file()?;
        self.save_to(&settings_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// The assignment mode in effect. Anything but `"team"` means per-user,
    /// matching the platform's historical behavior.
    pub fn assignment(&self) -> AssignmentMode {
        if self.docker_assignment == "team" {
            AssignmentMode::Team
        } else {
            AssignmentMode::User
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_string_selects_team_mode() {
        let settings = Settings {
            docker_assignment: "team".into(),
            ..Default::default()
        };
        assert_eq!(settings.assignment(), AssignmentMode::Team);
    }

    #[test]
    fn anything_else_defaults_to_user_mode() {
        for value in ["user", "unlimited", "", "TEAM"] {
            let settings = Settings {
                docker_assignment: value.into(),
                ..Default::default()
            };
            assert_eq!(settings.assignment(), AssignmentMode::User, "value: {value:?}");
        }
    }

    #[test]
    fn loads_partial_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "docker_assignment: team\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.assignment(), AssignmentMode::Team);
        assert_eq!(settings.runtime_timeout_secs, 30);
        assert!(!settings.retain_terminated);
    }
}
