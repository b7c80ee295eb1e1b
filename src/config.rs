use crate::error::{FeatureStoreError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "omero.features/0.1";
pub const DEFAULT_FEATURE_SUBSPACE: &str = "features";
pub const DEFAULT_ANNOTATION_SUBSPACE: &str = "source";

/// Runtime configuration for a feature table manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct FeatureStoreConfig {
    pub namespace: String,
    /// Path prefix under which table files are created.
    pub ft_space: String,
    /// Namespace attached to annotation links from objects to table files.
    pub ann_space: String,
    pub cache_size: usize,
    /// Upper bound on the payload of a single remote read.
    pub max_message_bytes: usize,
    pub bytes_per_scalar: usize,
    /// Size ceiling for a column name attribute in the table engine. Longer
    /// combined feature-name strings are logged, not rejected.
    pub max_column_name_bytes: usize,
    pub sentinel_id: i64,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }
}

/// On-disk form. Spaces left out are derived from `namespace`.
#[derive(Deserialize)]
#[serde(default)]
struct ConfigFile {
    namespace: String,
    ft_space: Option<String>,
    ann_space: Option<String>,
    cache_size: usize,
    max_message_bytes: usize,
    bytes_per_scalar: usize,
    max_column_name_bytes: usize,
    sentinel_id: i64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let defaults = FeatureStoreConfig::default();
        Self {
            namespace: defaults.namespace,
            ft_space: None,
            ann_space: None,
            cache_size: defaults.cache_size,
            max_message_bytes: defaults.max_message_bytes,
            bytes_per_scalar: defaults.bytes_per_scalar,
            max_column_name_bytes: defaults.max_column_name_bytes,
            sentinel_id: defaults.sentinel_id,
        }
    }
}

impl From<ConfigFile> for FeatureStoreConfig {
    fn from(file: ConfigFile) -> Self {
        let derived = FeatureStoreConfig::with_namespace(file.namespace);
        Self {
            ft_space: file.ft_space.unwrap_or(derived.ft_space),
            ann_space: file.ann_space.unwrap_or(derived.ann_space),
            namespace: derived.namespace,
            cache_size: file.cache_size,
            max_message_bytes: file.max_message_bytes,
            bytes_per_scalar: file.bytes_per_scalar,
            max_column_name_bytes: file.max_column_name_bytes,
            sentinel_id: file.sentinel_id,
        }
    }
}

impl FeatureStoreConfig {
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            ft_space: format!("{namespace}/{DEFAULT_FEATURE_SUBSPACE}"),
            ann_space: format!("{namespace}/{DEFAULT_ANNOTATION_SUBSPACE}"),
            namespace,
            cache_size: 10,
            max_message_bytes: 16 * 1024 * 1024,
            bytes_per_scalar: 8,
            max_column_name_bytes: 65_535,
            sentinel_id: -1,
        }
    }

    pub fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FeatureStoreError::InvalidConfig {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(FeatureStoreError::InvalidConfig {
                message: message.to_string(),
            })
        };
        if self.cache_size == 0 {
            return invalid("cache_size must be at least 1");
        }
        if self.max_message_bytes == 0 || self.bytes_per_scalar == 0 {
            return invalid("max_message_bytes and bytes_per_scalar must be non-zero");
        }
        if self.sentinel_id >= 0 {
            return invalid("sentinel_id must be negative");
        }
        if self.ft_space.is_empty() || self.ann_space.is_empty() {
            return invalid("ft_space and ann_space must be set");
        }
        Ok(())
    }
}
