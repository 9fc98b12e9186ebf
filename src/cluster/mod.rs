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

//! Clusters: node factories, cached node sets and master election.

mod error;
mod probe;
mod registry;

pub use error::ClusterError;
pub use probe::{MasterProbe, SchedulerProbe};
pub use registry::{cluster_from_hostname, default_cluster_name, known_clusters, ClusterProfile};

use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::Config;
use crate::inventory::Inventory;
use crate::node::{Action, CompositeNode, Management, Node, NodeError, Role};

/// One cluster and everything discovered about it during this run.
///
/// Node sets and the elected master are computed on first use and kept for
/// the lifetime of the value.
pub struct Cluster {
    profile: ClusterProfile,
    config: Arc<Config>,
    inventory: Arc<Inventory>,
    probe: Arc<dyn MasterProbe>,
    masters: OnceCell<CompositeNode>,
    master: OnceCell<Arc<Node>>,
    workers: OnceCell<CompositeNode>,
    storage: OnceCell<CompositeNode>,
    slots: Vec<(Action, Command)>,
}

impl Cluster {
    /// Look up a cluster by name.
    pub fn get(name: &str, config: Arc<Config>) -> Result<Self, ClusterError> {
        let profile = ClusterProfile::lookup(name, &config)?;
        debug!("creating cluster {}: {:?}", name, profile);
        Ok(Self {
            inventory: Arc::new(Inventory::new(Arc::clone(&config), name)),
            profile,
            config,
            probe: Arc::new(SchedulerProbe),
            masters: OnceCell::new(),
            master: OnceCell::new(),
            workers: OnceCell::new(),
            storage: OnceCell::new(),
            slots: Vec::new(),
        })
    }

    /// The cluster this host is part of, derived from its FQDN.
    pub fn for_this_host(config: Arc<Config>) -> Result<Self, ClusterError> {
        let name = default_cluster_name()?;
        debug!("Detected cluster {} as default cluster", name);
        Self::get(&name, config)
    }

    /// Replace the probe used to elect the master.
    pub fn with_probe(mut self, probe: Arc<dyn MasterProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Bind `command` to `action` on every node this cluster builds,
    /// whatever the node's hardware would normally use.
    pub fn with_slot(mut self, action: Action, command: Command) -> Self {
        self.slots.push((action, command));
        self
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &ClusterProfile {
        &self.profile
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn group_by_chassis(&self) -> bool {
        self.profile.group_by_chassis
    }

    fn build(
        &self,
        id: &str,
        role: Role,
        management: Management,
        master: Option<&Arc<Node>>,
    ) -> Result<Node, NodeError> {
        let mut builder = Node::builder(id, self.name(), role, management)
            .inventory(Arc::clone(&self.inventory));
        if let Some(master) = master {
            builder = builder.master(Arc::clone(master));
        }
        for (action, command) in &self.slots {
            builder = builder.slot(*action, command.clone());
        }
        builder.build(&self.config)
    }

    /// Build a set from `ids`, skipping ids whose node cannot be built.
    fn build_set(
        &self,
        ids: &[String],
        role: Role,
        management: Management,
        master: Option<&Arc<Node>>,
    ) -> CompositeNode {
        let mut nodes = CompositeNode::new();
        for id in ids {
            match self.build(id, role, management, master) {
                Ok(node) => nodes.add(node),
                Err(e) => warn!("could not create {:?} node {}: {}", role, id, e),
            }
        }
        nodes
    }

    /// Master candidates from the inventory.
    pub async fn masters(&self) -> Result<&CompositeNode, ClusterError> {
        self.masters
            .get_or_try_init(|| async {
                let ids = self.inventory.node_ids("quattor_masterid_regex").await?;
                debug!("master id's for {}: {:?}", self.name(), ids);
                Ok::<_, ClusterError>(self.build_set(&ids, Role::Master, self.profile.master, None))
            })
            .await
    }

    /// The master of this cluster.
    ///
    /// Candidates are probed in id order and the first one that answers is
    /// kept. When none answers the first candidate is used anyway.
    pub async fn master(&self) -> Result<Arc<Node>, ClusterError> {
        self.master
            .get_or_try_init(|| async {
                let candidates = self.masters().await?.nodes();
                let first = candidates.first().ok_or_else(|| ClusterError::NoMaster {
                    cluster: self.name().to_string(),
                })?;

                for candidate in &candidates {
                    let outcome = self.probe.probe(candidate).await;
                    match outcome.error {
                        None => {
                            info!("using {} as master of {}", candidate.id(), self.name());
                            return Ok(Arc::clone(candidate));
                        }
                        Some(e) => debug!("master candidate {} did not answer: {}", candidate.id(), e),
                    }
                }

                warn!(
                    "Could not get a working master for {}, make sure pbs is working on it, continuing with {}",
                    self.name(),
                    first.id()
                );
                Ok::<_, ClusterError>(Arc::clone(first))
            })
            .await
            .map(Arc::clone)
    }

    /// Worker nodes, from the master's scheduler or from the inventory when
    /// `quattor` is set. The first answer is kept.
    pub async fn worker_nodes(&self, quattor: bool) -> Result<&CompositeNode, ClusterError> {
        self.workers
            .get_or_try_init(|| async {
                let master = self.master().await?;
                let ids = if quattor {
                    self.inventory.node_ids("quattor_nodeid_regex").await?
                } else {
                    let ids = master.worker_ids().await;
                    if ids.is_empty() {
                        warn!("No nodes found on {}, you might want to try '-q'", master.id());
                    }
                    ids
                };
                debug!("worker node id's for {}: {:?}", self.name(), ids);
                Ok::<_, ClusterError>(self.build_set(
                    &ids,
                    Role::Worker,
                    self.profile.worker,
                    Some(&master),
                ))
            })
            .await
    }

    pub async fn storage_nodes(&self) -> Result<&CompositeNode, ClusterError> {
        self.storage
            .get_or_try_init(|| async {
                let ids = self.inventory.node_ids("quattor_storageid_regex").await?;
                debug!("storage id's for {}: {:?}", self.name(), ids);
                Ok::<_, ClusterError>(self.build_set(&ids, Role::Storage, self.profile.storage, None))
            })
            .await
    }

    /// Workers and masters. Storage nodes are not included.
    pub async fn all_nodes(&self, quattor: bool) -> Result<CompositeNode, ClusterError> {
        let mut nodes = CompositeNode::new();
        nodes.union(self.worker_nodes(quattor).await?);
        nodes.union(self.masters().await?);
        debug!("selected worker and master nodes: {}", nodes);
        Ok(nodes)
    }

    /// A fresh worker node with the given id, bypassing the scheduler.
    pub async fn node(&self, id: &str) -> Result<Arc<Node>, ClusterError> {
        let master = self.master().await?;
        let node = self.build(id, Role::Worker, self.profile.worker, Some(&master))?;
        Ok(Arc::new(node))
    }

    pub async fn nodes_from_chassis(
        &self,
        chassis: &str,
        quattor: bool,
    ) -> Result<CompositeNode, ClusterError> {
        debug!("selecting nodes from chassis: {}", chassis);
        Ok(self.all_nodes(quattor).await?.nodes_from_chassis(chassis))
    }

    pub async fn down_nodes(&self) -> Result<CompositeNode, ClusterError> {
        self.workers_in_state("down").await
    }

    pub async fn offline_nodes(&self) -> Result<CompositeNode, ClusterError> {
        self.workers_in_state("offline").await
    }

    pub async fn idle_nodes(&self) -> Result<CompositeNode, ClusterError> {
        self.workers_in_state("free").await
    }

    async fn workers_in_state(&self, state: &str) -> Result<CompositeNode, ClusterError> {
        Ok(self
            .worker_nodes(false)
            .await?
            .filter_by_scheduler_state(state)
            .await)
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("profile", &self.profile)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
