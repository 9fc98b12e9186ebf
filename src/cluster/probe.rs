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

use async_trait::async_trait;
use std::fmt;

use crate::command::Outcome;
use crate::node::Node;

/// Decides whether a master candidate is usable.
#[async_trait]
pub trait MasterProbe: Send + Sync + fmt::Debug {
    /// An outcome without error means the candidate answered.
    async fn probe(&self, candidate: &Node) -> Outcome;
}

/// Asks the candidate's scheduler for its node list with the fast timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerProbe;

#[async_trait]
impl MasterProbe for SchedulerProbe {
    async fn probe(&self, candidate: &Node) -> Outcome {
        candidate.probe_scheduler().await
    }
}
