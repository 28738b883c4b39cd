use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use folio_api::Timestamp;
use folio_core::{Selector, access_selector, eligibility_selector};

use crate::error::ConfigError;

/// Settings for one client embedding the consistency layer.
///
/// Nothing here is read ambiently: callers hand the relevant section to the
/// eligibility builders, the resolver and the change queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub logging: LoggingConfig,
    pub content: ContentConfig,
    pub resolver: ResolverConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Most preferred language first
    pub language_priority: Vec<String>,
    /// Access groups of the current viewer
    pub access_groups: Vec<String>,
}

impl ContentConfig {
    /// `base` restricted to documents this viewer may see right now: eligible under
    /// the language priority and a member of one of the viewer's access groups.
    pub fn visible(&self, base: Selector, now: Timestamp) -> Selector {
        Selector::and(vec![
            eligibility_selector(base, &self.language_priority, now),
            access_selector(&self.access_groups),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Re-probe resolutions that settled while offline once connectivity returns
    pub reprobe_on_reconnect: bool,
    pub remote_limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            reprobe_on_reconnect: true,
            remote_limit: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Transient failures tolerated before an entry is rejected
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl FolioConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
            .with_context(|| format!("Failed to load config {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to load config {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: FolioConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.resolver.remote_limit == 0 {
            return Err(ConfigError::Invalid(
                "resolver.remote_limit must be at least 1".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for language in &self.content.language_priority {
            if !seen.insert(language.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "language `{language}` appears twice in content.language_priority"
                )));
            }
        }
        Ok(())
    }
}
