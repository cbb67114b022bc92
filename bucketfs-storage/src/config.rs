use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use bucketfs_common::config::keys;
use bucketfs_common::{ConfigProvider, MapConfig};

/// Configuration file of the `bucketfs` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketfsConfig {
    /// `s3` (or `oss`) for object storage, `local` (or `directory`) for a
    /// directory on disk.
    pub backend: String,
    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
}

impl BucketfsConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: BucketfsConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in &self.settings {
            if !matches!(
                value,
                toml::Value::String(_) | toml::Value::Integer(_) | toml::Value::Boolean(_)
            ) {
                anyhow::bail!("setting '{}' must be a string, integer or boolean", name);
            }
        }
        match self.backend.as_str() {
            "s3" | "oss" => {
                let missing = self.to_map().missing_required();
                if !missing.is_empty() {
                    anyhow::bail!("missing settings: {}", missing.join(", "));
                }
            }
            "local" | "directory" => {
                if self.to_map().get_non_empty(keys::ROOT).is_none() {
                    anyhow::bail!("the local backend requires settings.{}", keys::ROOT);
                }
            }
            "" => anyhow::bail!("backend must not be empty"),
            other => anyhow::bail!("unknown backend: {}", other),
        }
        Ok(())
    }

    /// Settings flattened to the string form backends read.
    pub fn to_map(&self) -> MapConfig {
        self.settings
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let toml_str = r#"
backend = "s3"

[settings]
accessKeyId = "AKID"
accessKeySecret = "secret"
endpoint = "https://s3.example.com"
bucket = "media"
base_url = "https://cdn.example.com"
timeout = 30
max_tries = 5
verify_ssl = true
"#;
        let config: BucketfsConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        let map = config.to_map();
        assert_eq!(map.get(keys::BUCKET), Some("media"));
        assert_eq!(map.get(keys::TIMEOUT), Some("30"));
        assert_eq!(map.get(keys::VERIFY_SSL), Some("true"));
    }

    #[test]
    fn test_missing_required_settings() {
        let toml_str = r#"
backend = "s3"

[settings]
accessKeyId = "AKID"
bucket = "media"
"#;
        let config: BucketfsConfig = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("accessKeySecret"));
        assert!(err.contains("endpoint"));
    }

    #[test]
    fn test_local_backend_needs_root() {
        let config: BucketfsConfig = toml::from_str("backend = \"local\"").unwrap();
        assert!(config.validate().is_err());

        let config: BucketfsConfig =
            toml::from_str("backend = \"local\"\n[settings]\nroot = \"/srv/files\"").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_nested_setting_rejected() {
        let toml_str = r#"
backend = "local"

[settings]
root = "/srv/files"
proxy = { url = "http://proxy:3128" }
"#;
        let config: BucketfsConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucketfs.toml");
        std::fs::write(&path, "backend = \"ftp\"").unwrap();
        let err = BucketfsConfig::load(&path).unwrap_err();
        assert_eq!(err.to_string(), "unknown backend: ftp");
        assert!(BucketfsConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
