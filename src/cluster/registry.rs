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

//! Which kind of hardware each cluster runs on.

use crate::config::{ClusterProfileConfig, Config};
use crate::node::Management;

use super::error::ClusterError;

/// Node profiles of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterProfile {
    pub name: String,
    pub worker: Management,
    pub master: Management,
    pub storage: Management,
    /// Serialize commands per enclosure during fan-out.
    pub group_by_chassis: bool,
}

impl ClusterProfile {
    fn new(name: &str, worker: Management, master: Management) -> Self {
        Self {
            name: name.to_string(),
            worker,
            master,
            storage: Management::Unmanaged,
            group_by_chassis: false,
        }
    }

    /// Profiles shipped with misty.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "shuppet" => Some(Self::new(name, Management::Imm, Management::Blade)),
            "raichu" | "phanpy" | "golett" | "swalot" => {
                Some(Self::new(name, Management::DmtfIpmi, Management::DmtfIpmi))
            }
            "delcatty" => Some(Self::new(name, Management::Ipmi, Management::Drac)),
            _ => None,
        }
    }

    pub const BUILTIN_NAMES: [&'static str; 6] =
        ["shuppet", "raichu", "phanpy", "golett", "swalot", "delcatty"];

    /// Resolve `name` from the built-in table, with overrides from the
    /// `clusters` section of the configuration applied on top.
    pub fn lookup(name: &str, config: &Config) -> Result<Self, ClusterError> {
        let overrides = config.cluster_profile(name);
        let mut profile = match (Self::builtin(name), overrides) {
            (Some(profile), _) => profile,
            (None, Some(_)) => Self::new(name, Management::Unmanaged, Management::Unmanaged),
            (None, None) => {
                return Err(ClusterError::NoSuchCluster {
                    name: name.to_string(),
                })
            }
        };

        if let Some(overrides) = overrides {
            profile.apply(overrides)?;
        }
        Ok(profile)
    }

    fn apply(&mut self, overrides: &ClusterProfileConfig) -> Result<(), ClusterError> {
        if let Some(worker) = &overrides.worker {
            self.worker = worker.parse()?;
        }
        if let Some(master) = &overrides.master {
            self.master = master.parse()?;
        }
        if let Some(storage) = &overrides.storage {
            self.storage = storage.parse()?;
        }
        if let Some(group) = overrides.group_by_chassis {
            self.group_by_chassis = group;
        }
        Ok(())
    }
}

/// All cluster names known from the built-in table and the configuration.
pub fn known_clusters(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = ClusterProfile::BUILTIN_NAMES
        .iter()
        .map(|n| n.to_string())
        .chain(config.cluster_names().map(str::to_string))
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Cluster name encoded in a host name: the second label of the FQDN.
pub fn cluster_from_hostname(hostname: &str) -> Result<String, ClusterError> {
    match hostname.split('.').nth(1) {
        Some(label) if !label.is_empty() => Ok(label.to_string()),
        _ => Err(ClusterError::UnknownHostname {
            hostname: hostname.to_string(),
        }),
    }
}

/// Cluster this host belongs to.
pub fn default_cluster_name() -> Result<String, ClusterError> {
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::debug!("hostname: {}", hostname);
    cluster_from_hostname(&hostname)
}
