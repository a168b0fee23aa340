use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::utils::paths;

/// A declared container port, with an optional label shown on the
/// dashboard ("web", "ssh", ...). Labels only annotate; they never change
/// how ports are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSpec {
    pub port: u16,
    pub label: Option<String>,
}

/// A challenge definition that provisions on-demand containers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSpec {
    pub name: String,
    pub image: String,

    /// Declared ports, in the order the dashboard should show them.
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// Instance lifetime in seconds.
    #[serde(default = "default_lifetime")]
    pub lifetime_secs: u64,

    pub command: Option<Vec<String>>,
}

fn default_lifetime() -> u64 {
    3600
}

impl ChallengeSpec {
    pub fn internal_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.port).collect()
    }

    pub fn label_for(&self, port: u16) -> Option<&str> {
        self.ports
            .iter()
            .find(|p| p.port == port)
            .and_then(|p| p.label.as_deref())
    }
}

/// Read-only lookup of challenge definitions, keyed by challenge id.
/// Stored in ~/.instancer/challenges.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChallengeCatalog {
    #[serde(default)]
    pub challenges: HashMap<i64, ChallengeSpec>,
}

impl ChallengeCatalog {
    /// Load the catalog from disk, creating an empty one if not exists
    pub fn load() -> Result<Self> {
        let path = paths::get_challenges_file()?;

        if !path.exists() {
            let catalog = Self::default();
            catalog.save_to(&path)?;
            return Ok(catalog);
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read challenge catalog: {}", path.display()))?;

        let catalog: ChallengeCatalog = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse challenge catalog")?;

        Ok(catalog)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn get(&self, challenge_id: i64) -> Option<&ChallengeSpec> {
        self.challenges.get(&challenge_id)
    }

    /// Challenges sorted by id, for listings.
    pub fn iter_sorted(&self) -> Vec<(i64, &ChallengeSpec)> {
        let mut entries: Vec<(i64, &ChallengeSpec)> =
            self.challenges.iter().map(|(id, c)| (*id, c)).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// A small example catalog written by `instancer init`.
    pub fn sample() -> Self {
        let mut challenges = HashMap::new();
        challenges.insert(
            1,
            ChallengeSpec {
                name: "example-web".to_string(),
                image: "challenges/example-web:latest".to_string(),
                ports: vec![
                    PortSpec {
                        port: 80,
                        label: Some("web".to_string()),
                    },
                    PortSpec {
                        port: 1337,
                        label: Some("api".to_string()),
                    },
                ],
                lifetime_secs: 1800,
                command: None,
            },
        );
        Self { challenges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("challenges.yaml");
        std::fs::write(
            &path,
            r#"
challenges:
  5:
    name: pwn-me
    image: challenges/pwn-me:v2
    ports:
      - port: 1337
        label: nc
      - port: 1338
    lifetime_secs: 600
"#,
        )
        .unwrap();

        let catalog = ChallengeCatalog::load_from(&path).unwrap();
        let spec = catalog.get(5).unwrap();
        assert_eq!(spec.internal_ports(), vec![1337, 1338]);
        assert_eq!(spec.label_for(1337), Some("nc"));
        assert_eq!(spec.label_for(1338), None);
        assert_eq!(spec.lifetime_secs, 600);
        assert!(catalog.get(6).is_none());
    }

    #[test]
    fn missing_lifetime_falls_back_to_default() {
        let yaml = "challenges:\n  1:\n    name: x\n    image: y\n";
        let catalog: ChallengeCatalog = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(catalog.get(1).unwrap().lifetime_secs, 3600);
    }
}
