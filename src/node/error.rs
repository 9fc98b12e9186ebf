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

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Node {id} not found")]
    NotFound { id: String },

    #[error("Fan-out already in progress on this node set")]
    FanoutInProgress,

    #[error("No nodes selected to {action}")]
    NoNodesSelected { action: String },

    #[error("Node {id} has no master")]
    MissingMaster { id: String },

    #[error("No inventory entry for node {id} in {path}")]
    NoInventoryEntry { id: String, path: PathBuf },

    #[error("Could not determine the location of {id}: {reason}")]
    Location { id: String, reason: String },

    #[error("Unknown management type '{name}'")]
    UnknownManagement { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl NodeError {
    pub(crate) fn from_inventory(id: &str, err: InventoryError) -> Self {
        match err {
            InventoryError::NoEntry { id, path } => NodeError::NoInventoryEntry { id, path },
            InventoryError::Config(e) => NodeError::Config(e),
            other => NodeError::Location {
                id: id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
