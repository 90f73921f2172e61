/// Stack configuration for Helios
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::cluster::ClusterDescriptor;

/// Project namespace used when none is given on the command line
pub const DEFAULT_PROJECT: &str = "helios";

pub const CLUSTER_NAME_KEY: &str = "clusterName";
pub const IMAGE_PATH_KEY: &str = "imagePath";

pub const DEFAULT_CLUSTER_NAME: &str = "helios-k3d";
pub const DEFAULT_IMAGE_PATH: &str = "../output-k3d-cluster/k3d-cluster-latest.tar.gz";

/// Environment variables that override the stack file
const ENV_OVERRIDES: [(&str, &str); 2] = [
    (CLUSTER_NAME_KEY, "HELIOS_CLUSTER_NAME"),
    (IMAGE_PATH_KEY, "HELIOS_IMAGE_PATH"),
];

/// Key/value stack configuration, stored as `config: {"<project>:<key>": value}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(skip)]
    project: String,

    #[serde(default)]
    config: BTreeMap<String, serde_yaml::Value>,

    #[serde(skip)]
    overrides: BTreeMap<String, String>,
}

impl StackConfig {
    /// Empty configuration for a project
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML stack file. A missing file yields an
    /// empty configuration.
    pub fn load<P: AsRef<Path>>(path: P, project: &str) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No stack file at {}, using defaults", path.display());
            return Ok(Self::new(project));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: StackConfig = if content.trim().is_empty() {
            StackConfig::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };
        config.project = project.to_string();
        Ok(config)
    }

    /// Apply `HELIOS_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        let vars = ENV_OVERRIDES
            .iter()
            .filter_map(|(key, var)| std::env::var(var).ok().map(|value| (*key, value)));
        self.with_overrides(vars)
    }

    /// Values that take precedence over the stack file; empty values are ignored
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in overrides {
            let value = value.into();
            if !value.is_empty() {
                self.overrides.insert(key.into(), value);
            }
        }
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Look up a key, preferring `<project>:<key>` over the bare key.
    /// Empty values count as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value.clone());
        }

        [self.namespaced(key), key.to_string()]
            .iter()
            .filter_map(|k| self.config.get(k))
            .filter_map(scalar_to_string)
            .find(|value| !value.is_empty())
    }

    /// Store a value under `<project>:<key>`; keys that already carry a
    /// namespace are stored as given
    pub fn set(&mut self, key: &str, value: &str) {
        let key = if key.contains(':') {
            key.to_string()
        } else {
            self.namespaced(key)
        };
        self.config
            .insert(key, serde_yaml::Value::String(value.to_string()));
    }

    /// Write the stack file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Generate an example stack configuration
    pub fn example(project: &str) -> Self {
        let mut config = Self::new(project);
        config.set(CLUSTER_NAME_KEY, DEFAULT_CLUSTER_NAME);
        config.set(IMAGE_PATH_KEY, DEFAULT_IMAGE_PATH);
        config
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.project, key)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Raw cluster settings as found in the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSettings {
    pub cluster_name: Option<String>,
    pub image_path: Option<String>,
}

impl ClusterSettings {
    pub fn from_config(config: &StackConfig) -> Self {
        Self {
            cluster_name: config.get(CLUSTER_NAME_KEY),
            image_path: config.get(IMAGE_PATH_KEY),
        }
    }

    /// Resolve the cluster descriptor, substituting defaults for absent values
    pub fn resolve(config: &StackConfig) -> ClusterDescriptor {
        Self::from_config(config).into_descriptor()
    }

    pub fn into_descriptor(self) -> ClusterDescriptor {
        ClusterDescriptor::new(
            self.cluster_name
                .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string()),
            self.image_path
                .unwrap_or_else(|| DEFAULT_IMAGE_PATH.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{CPU_COUNT, MEMORY_GB};

    fn from_yaml(yaml: &str) -> StackConfig {
        let mut config: StackConfig = serde_yaml::from_str(yaml).unwrap();
        config.project = DEFAULT_PROJECT.to_string();
        config
    }

    #[test]
    fn test_defaults_for_absent_values() {
        let descriptor = ClusterSettings::resolve(&StackConfig::new(DEFAULT_PROJECT));
        assert_eq!(descriptor.name, DEFAULT_CLUSTER_NAME);
        assert_eq!(descriptor.image_path, DEFAULT_IMAGE_PATH);
    }

    #[test]
    fn test_defaults_for_empty_values() {
        let config = from_yaml("config:\n  helios:clusterName: \"\"\n  helios:imagePath: \"\"\n");
        let descriptor = ClusterSettings::resolve(&config);

        assert_eq!(
            descriptor,
            ClusterDescriptor {
                name: "helios-k3d".to_string(),
                image_path: "../output-k3d-cluster/k3d-cluster-latest.tar.gz".to_string(),
                memory_gb: MEMORY_GB,
                cpu_count: CPU_COUNT,
            }
        );
    }

    #[test]
    fn test_values_taken_verbatim() {
        let config = from_yaml("config:\n  helios:clusterName: \" demo \"\n  imagePath: /tmp/img.tar.gz\n");
        let descriptor = ClusterSettings::resolve(&config);

        assert_eq!(descriptor.name, " demo ");
        assert_eq!(descriptor.image_path, "/tmp/img.tar.gz");
        assert_eq!(descriptor.memory_gb, 4);
        assert_eq!(descriptor.cpu_count, 2);
    }

    #[test]
    fn test_namespaced_key_wins() {
        let config = from_yaml("config:\n  clusterName: bare\n  helios:clusterName: namespaced\n");
        assert_eq!(config.get(CLUSTER_NAME_KEY).as_deref(), Some("namespaced"));

        let other = from_yaml("config:\n  other:clusterName: elsewhere\n");
        assert_eq!(other.get(CLUSTER_NAME_KEY), None);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = from_yaml("config:\n  helios:clusterName: file\n")
            .with_overrides([(CLUSTER_NAME_KEY, "env"), (IMAGE_PATH_KEY, "")]);

        assert_eq!(config.get(CLUSTER_NAME_KEY).as_deref(), Some("env"));
        assert_eq!(config.get(IMAGE_PATH_KEY), None);
    }

    #[test]
    fn test_env_override_wins_over_file() {
        std::env::remove_var("HELIOS_IMAGE_PATH");
        std::env::set_var("HELIOS_CLUSTER_NAME", "from-env");
        let config = from_yaml("config:\n  helios:clusterName: file\n  helios:imagePath: ./img.tar.gz\n")
            .with_env_overrides();
        std::env::remove_var("HELIOS_CLUSTER_NAME");

        let descriptor = ClusterSettings::resolve(&config);
        assert_eq!(descriptor.name, "from-env");
        assert_eq!(descriptor.image_path, "./img.tar.gz");
    }

    #[test]
    fn test_set_and_save_round_trip() {
        let dir = std::env::temp_dir().join(format!("helios-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("Pulumi.dev.yaml");

        let mut config = StackConfig::example(DEFAULT_PROJECT);
        config.set(CLUSTER_NAME_KEY, "demo");
        config.save(&path).unwrap();

        let loaded = StackConfig::load(&path, DEFAULT_PROJECT).unwrap();
        assert_eq!(loaded.get(CLUSTER_NAME_KEY).as_deref(), Some("demo"));
        assert_eq!(loaded.get(IMAGE_PATH_KEY).as_deref(), Some(DEFAULT_IMAGE_PATH));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let missing = StackConfig::load("/nonexistent/Pulumi.dev.yaml", DEFAULT_PROJECT).unwrap();
        assert_eq!(missing.get(CLUSTER_NAME_KEY), None);

        let dir = std::env::temp_dir().join(format!("helios-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("Pulumi.dev.yaml");
        std::fs::write(&path, "config: [not, a, map]\n").unwrap();

        let err = StackConfig::load(&path, DEFAULT_PROJECT).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
