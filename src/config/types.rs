// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ConfigError;
use super::utils::{expand_tilde_str, render_template};

/// Process-wide configuration.
///
/// Loaded once at startup and shared read-only (usually behind an `Arc`)
/// with every component that needs hostnames, credentials, templates or
/// timeouts.
#[derive(Debug, Default, Clone)]
pub struct Config {
    raw: HashMap<String, String>,
    clusters: HashMap<String, ClusterProfileConfig>,
    sources: Vec<PathBuf>,
}

/// On-disk layout of one configuration file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct ConfigFile {
    #[serde(default)]
    pub raw_configs: HashMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub clusters: HashMap<String, ClusterProfileConfig>,
}

/// Cluster profile override as written in a configuration file.
///
/// Management kinds are kept as strings here and validated by the cluster
/// registry when the profile is looked up.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterProfileConfig {
    pub worker: Option<String>,
    pub master: Option<String>,
    pub storage: Option<String>,
    pub group_by_chassis: Option<bool>,
}

impl Config {
    /// Defaults for keys that have a sensible value on any site.
    pub fn builtin_defaults() -> Self {
        Self::from_pairs([
            ("command_timeout", "60"),
            ("command_fast_timeout", "5"),
            ("ssh_connect_timeout", "10"),
            ("ssh_user", "root"),
            ("down_time", "2"),
            ("host_tpl", "{nodeid}.{clustername}"),
            ("nodename_tpl", "{nodeid}.{clustername}"),
            ("imm_tpl", "{nodeid}-imm.{clustername}"),
            ("icinga_hostname", "{host_name}"),
            ("icinga_default_comment", "scheduled by misty"),
        ])
    }

    /// Build an in-memory provider from key/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let raw = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
            .collect();
        Self {
            raw,
            ..Self::default()
        }
    }

    /// Layer `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.raw.extend(other.raw);
        self.clusters.extend(other.clusters);
        self.sources.extend(other.sources);
    }

    /// Set a single key, overriding any loaded value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.raw.insert(key.to_lowercase(), value.into());
    }

    /// Add or replace a cluster profile override.
    pub fn set_cluster(&mut self, name: &str, profile: ClusterProfileConfig) {
        self.clusters.insert(name.to_string(), profile);
    }

    /// Look up a key.
    ///
    /// Lookup is case-insensitive. Keys ending in `_path` are tilde-expanded.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let lowered = key.to_lowercase();
        let value = self
            .raw
            .get(&lowered)
            .ok_or_else(|| ConfigError::MissingKey {
                key: lowered.clone(),
                locations: self.describe_sources(),
            })?;

        if lowered.ends_with("_path") {
            Ok(expand_tilde_str(value))
        } else {
            Ok(value.clone())
        }
    }

    /// Look up a key, falling back to `default` when it is absent.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|_| default.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.raw.contains_key(&key.to_lowercase())
    }

    /// Look up a key holding a number of seconds.
    pub fn get_secs(&self, key: &str) -> Result<Duration, ConfigError> {
        let secs = self.get_f64(key)?;
        if secs < 0.0 || !secs.is_finite() {
            return Err(ConfigError::Invalid {
                key: key.to_lowercase(),
                value: secs.to_string(),
                reason: "expected a non-negative number of seconds".to_string(),
            });
        }
        Ok(Duration::from_secs_f64(secs))
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.get(key)?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| ConfigError::Invalid {
                key: key.to_lowercase(),
                value: value.clone(),
                reason: e.to_string(),
            })
    }

    /// Render the template stored under `key` with the given parameters.
    pub fn render(&self, key: &str, params: &[(&str, &str)]) -> Result<String, ConfigError> {
        let template = self.get(key)?;
        render_template(&template, params)
    }

    /// Cluster profile overrides from the `clusters` section.
    pub fn cluster_profile(&self, name: &str) -> Option<&ClusterProfileConfig> {
        self.clusters.get(name)
    }

    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.clusters.keys().map(String::as_str)
    }

    /// Files this configuration was assembled from, lowest priority first.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub(super) fn from_file(file: ConfigFile, source: PathBuf) -> Self {
        let raw = file
            .raw_configs
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Null => return None,
                    other => {
                        tracing::warn!(
                            "Ignoring non-scalar value for '{}' in {}: {:?}",
                            key,
                            source.display(),
                            other
                        );
                        return None;
                    }
                };
                Some((key.to_lowercase(), value))
            })
            .collect();

        Self {
            raw,
            clusters: file.clusters,
            sources: vec![source],
        }
    }

    fn describe_sources(&self) -> String {
        if self.sources.is_empty() {
            super::loader::default_locations()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            self.sources
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}
