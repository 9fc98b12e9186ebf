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

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::inventory::InventoryError;
use crate::node::NodeError;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("No such cluster {name}")]
    NoSuchCluster { name: String },

    #[error("{cluster}: could not get a master — check inventory configuration")]
    NoMaster { cluster: String },

    #[error("Path {path} not found, is this not a quattor server?")]
    InventoryMissing { path: PathBuf },

    #[error("Hostname {hostname} is not a fqdn, could not guess clustername, set it on the command line with --cluster <clustername>")]
    UnknownHostname { hostname: String },

    #[error(transparent)]
    Inventory(InventoryError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<InventoryError> for ClusterError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Missing { path } => ClusterError::InventoryMissing { path },
            InventoryError::Config(e) => ClusterError::Config(e),
            other => ClusterError::Inventory(other),
        }
    }
}
