//! Engine configuration
//!
//! ```yaml
//! version: 1
//! batch_size: 200
//! submit_timeout_ms: 10000
//! max_in_flight_batches: 8
//! max_containment_depth: 4
//! proxy_marker: "$$Proxy"
//! ```
//!
//! Every setting except `version` is optional and falls back to its default.

pub mod error;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use validation::Validatable;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validation::check_range;

/// Supported YAML schema versions
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Indexing engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Work items per backend batch
    pub batch_size: usize,

    /// Deadline for one batch submission
    pub submit_timeout_ms: u64,

    /// Batches submitted concurrently per unit of work
    pub max_in_flight_batches: usize,

    /// Longest embedding chain followed by the containment graph
    pub max_containment_depth: usize,

    /// Runtime class names containing this marker are proxies
    pub proxy_marker: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            submit_timeout_ms: 30_000,
            max_in_flight_batches: 4,
            max_containment_depth: 8,
            proxy_marker: "$$Proxy".to_string(),
        }
    }
}

/// YAML schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexingConfigFileV1 {
    version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submit_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_in_flight_batches: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_containment_depth: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proxy_marker: Option<String>,
}

impl IndexingConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_submit_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.submit_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_in_flight_batches(mut self, max: usize) -> Self {
        self.max_in_flight_batches = max;
        self
    }

    pub fn with_max_containment_depth(mut self, depth: usize) -> Self {
        self.max_containment_depth = depth;
        self
    }

    /// Load from YAML file (v1 schema)
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse YAML text (v1 schema) and validate the result
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: IndexingConfigFileV1 = serde_yaml::from_str(content)?;

        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let defaults = Self::default();
        let config = Self {
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            submit_timeout_ms: file.submit_timeout_ms.unwrap_or(defaults.submit_timeout_ms),
            max_in_flight_batches: file
                .max_in_flight_batches
                .unwrap_or(defaults.max_in_flight_batches),
            max_containment_depth: file
                .max_containment_depth
                .unwrap_or(defaults.max_containment_depth),
            proxy_marker: file.proxy_marker.unwrap_or(defaults.proxy_marker),
        };
        config.validate()?;
        Ok(config)
    }

    /// Serialize as a v1 YAML document
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = IndexingConfigFileV1 {
            version: Some(1),
            batch_size: Some(self.batch_size),
            submit_timeout_ms: Some(self.submit_timeout_ms),
            max_in_flight_batches: Some(self.max_in_flight_batches),
            max_containment_depth: Some(self.max_containment_depth),
            proxy_marker: Some(self.proxy_marker.clone()),
        };
        Ok(serde_yaml::to_string(&file)?)
    }
}

impl Validatable for IndexingConfig {
    fn validate(&self) -> ConfigResult<()> {
        check_range(
            "batch_size",
            self.batch_size,
            1..=10_000,
            "A batch must carry at least one work item",
        )?;
        check_range(
            "submit_timeout_ms",
            self.submit_timeout_ms,
            1..=600_000,
            "Submission deadline must be positive and at most 10 minutes",
        )?;
        check_range(
            "max_in_flight_batches",
            self.max_in_flight_batches,
            1..=256,
            "At least one batch must be allowed in flight",
        )?;
        check_range(
            "max_containment_depth",
            self.max_containment_depth,
            1..=64,
            "Containment depth must allow at least one embedding level",
        )?;
        if self.proxy_marker.is_empty() {
            return Err(ConfigError::Custom(
                "proxy_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "IndexingConfig"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = IndexingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.submit_timeout(), Duration::from_secs(30));
        assert_eq!(config.proxy_marker, "$$Proxy");
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = IndexingConfig::from_yaml_str(
            r#"
version: 1
batch_size: 250
max_in_flight_batches: 2
"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.max_in_flight_batches, 2);
        assert_eq!(config.submit_timeout_ms, 30_000);
    }

    #[test]
    fn test_yaml_from_file() {
        let yaml_content = r#"
version: 1
submit_timeout_ms: 500
proxy_marker: "_$$_jvst"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = IndexingConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.submit_timeout_ms, 500);
        assert_eq!(config.proxy_marker, "_$$_jvst");
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = IndexingConfig::from_yaml_str("batch_size: 10\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let result = IndexingConfig::from_yaml_str("version: 2\n");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let result = IndexingConfig::from_yaml_str("version: 1\nbatch_sise: 10\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_out_of_range() {
        let result = IndexingConfig::from_yaml_str("version: 1\nbatch_size: 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::Range { ref field, .. }) if field == "batch_size"
        ));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = IndexingConfig::default()
            .with_batch_size(7)
            .with_max_containment_depth(3);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert_eq!(IndexingConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
