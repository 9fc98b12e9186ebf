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

//! Quattor inventory: node ids and physical locations from profile files.
//!
//! The inventory is a directory of JSON profiles (optionally gzipped) whose
//! file names encode the cluster and the node id, e.g.
//! `node2201.shuppet.gent.vsc.json.gz`.

use flate2::read::GzDecoder;
use regex::Regex;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::config::{Config, ConfigError};

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Path {path} not found, is this not a quattor server?")]
    Missing { path: PathBuf },

    #[error("No file found for node {id} in {path}")]
    NoEntry { id: String, path: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid inventory pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} has no element '{key}'")]
    NoElement { path: PathBuf, key: String },
}

/// Physical position of a node.
///
/// Both halves are `None` when the inventory location string does not
/// describe a chassis slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub slot: Option<u32>,
    pub chassis: Option<String>,
}

/// Read access to the quattor profiles of one cluster.
#[derive(Debug, Clone)]
pub struct Inventory {
    config: Arc<Config>,
    cluster: String,
}

impl Inventory {
    pub fn new(config: Arc<Config>, cluster: impl Into<String>) -> Self {
        Self {
            config,
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    fn root(&self) -> Result<PathBuf, InventoryError> {
        Ok(PathBuf::from(self.config.get("quattor_path")?))
    }

    /// Ids of all profiles whose file name matches `quattor_files_tpl`
    /// rendered with the id regex stored under `id_regex_key`.
    ///
    /// The regex must contain a named group `id`. Returns sorted unique ids.
    pub async fn node_ids(&self, id_regex_key: &str) -> Result<Vec<String>, InventoryError> {
        let root = self.root()?;
        let id_regex = self.config.get(id_regex_key)?;
        let pattern = self.config.render(
            "quattor_files_tpl",
            &[("clustername", self.cluster.as_str()), ("nodeid", id_regex.as_str())],
        )?;
        let regex =
            Regex::new(&format!("^(?:{pattern})")).map_err(|e| InventoryError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;

        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            return Err(InventoryError::Missing { path: root });
        }

        debug!("matching files for regex {}", regex.as_str());
        let io_err = |source| InventoryError::Io {
            path: root.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&root).await.map_err(io_err)?;
        let mut ids = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(id) = regex.captures(&file_name).and_then(|c| c.name("id")) {
                debug!("matched filename: {}", file_name);
                ids.insert(id.as_str().to_string());
            }
        }

        Ok(ids.into_iter().collect())
    }

    /// Path of the profile of `node_id`; it must exist.
    pub fn profile_path(&self, node_id: &str) -> Result<PathBuf, InventoryError> {
        let file_name = self.config.render(
            "quattor_files_tpl",
            &[("nodeid", node_id), ("clustername", self.cluster.as_str())],
        )?;
        let path = self.root()?.join(file_name);
        if !path.exists() {
            return Err(InventoryError::NoEntry {
                id: node_id.to_string(),
                path,
            });
        }
        Ok(path)
    }

    /// Slot and chassis of `node_id` according to its profile.
    pub fn location(&self, node_id: &str) -> Result<Location, InventoryError> {
        let path = self.profile_path(node_id)?;
        let key_path = self.config.get("location_json")?;
        let element = read_element(&path, &key_path)?;
        debug!("location of {}: {}", node_id, element);
        self.parse_location(&element)
    }

    fn parse_location(&self, location: &str) -> Result<Location, InventoryError> {
        let pattern = self.config.get("quattor_location_string_regex")?;
        let regex = Regex::new(&pattern).map_err(|e| InventoryError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        let captures = match regex.captures(location) {
            Some(captures) if !location.is_empty() => captures,
            _ => {
                debug!("No chassis and slot location found in '{}'", location);
                return Ok(Location::default());
            }
        };

        let chassis = captures
            .name("chassis")
            .and_then(|m| m.as_str().parse::<u32>().ok());
        let slot = captures
            .name("slot")
            .and_then(|m| m.as_str().parse::<u32>().ok());

        let chassis = match chassis {
            Some(number) => {
                let number = number.to_string();
                Some(self.config.render(
                    "chasisname_tpl",
                    &[
                        ("chassisname", number.as_str()),
                        ("clustername", self.cluster.as_str()),
                    ],
                )?)
            }
            None => None,
        };

        Ok(Location { slot, chassis })
    }
}

/// Read a JSON profile and walk the comma separated `key_path`.
fn read_element(path: &PathBuf, key_path: &str) -> Result<String, InventoryError> {
    let io_err = |source| InventoryError::Io {
        path: path.clone(),
        source,
    };
    let raw = std::fs::read(path).map_err(io_err)?;
    let content = if path.to_string_lossy().contains("gz") {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(io_err)?;
        decoded
    } else {
        raw
    };

    let document: serde_json::Value =
        serde_json::from_slice(&content).map_err(|source| InventoryError::Json {
            path: path.clone(),
            source,
        })?;

    let mut element = &document;
    for key in key_path.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        element = element.get(key).ok_or_else(|| InventoryError::NoElement {
            path: path.clone(),
            key: key.to_string(),
        })?;
    }

    Ok(match element {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
