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

use std::sync::Arc;

use crate::command::{Command, Outcome};

use super::Node;

/// One executed command and what it produced.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub command: Command,
    pub outcome: Outcome,
}

/// Everything one fan-out target produced, tagged with the target's id.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub target: String,
    pub records: Vec<CommandRecord>,
    /// Set when the task running this target died before reporting.
    pub failure: Option<String>,
}

impl NodeReport {
    pub fn new(target: impl Into<String>, records: Vec<CommandRecord>) -> Self {
        Self {
            target: target.into(),
            records,
            failure: None,
        }
    }

    pub fn failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            records: Vec::new(),
            failure: Some(reason.into()),
        }
    }

    pub fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self.failure.iter().cloned().collect();
        for record in &self.records {
            errors.extend(record.outcome.errors());
        }
        errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }
}

/// Status of one node as gathered by a status fan-out.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node: Arc<Node>,
    pub outcome: Outcome,
}
