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

//! Node sets and the fan-out engine.
//!
//! Members are kept sorted by id. Running a set spawns one task per member
//! (or per enclosure when grouping) and joins them all before returning.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, error};

use crate::command::{Outcome, Output};

use super::action::Action;
use super::error::NodeError;
use super::report::{NodeReport, NodeStatus};
use super::Node;

/// Bucket for nodes whose enclosure is unknown.
pub const NO_ENCLOSURE: &str = "None";

/// A direct member of a [`CompositeNode`].
#[derive(Debug, Clone)]
pub enum Member {
    Node(Arc<Node>),
    Group(Arc<CompositeNode>),
}

impl Member {
    pub fn id(&self) -> &str {
        match self {
            Member::Node(node) => node.id(),
            Member::Group(group) => group.id(),
        }
    }

    /// Every node in this member, sorted by id.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        match self {
            Member::Node(node) => vec![Arc::clone(node)],
            Member::Group(group) => group.nodes(),
        }
    }

    fn run_all(self) -> BoxFuture<'static, Vec<NodeReport>> {
        async move {
            match self {
                Member::Node(node) => vec![NodeReport::new(node.id(), node.run_all().await)],
                Member::Group(group) => match group.run_all(false, false).await {
                    Ok(reports) => reports,
                    Err(e) => group
                        .nodes()
                        .iter()
                        .map(|node| NodeReport::failed(node.id(), e.to_string()))
                        .collect(),
                },
            }
        }
        .boxed()
    }

    fn status(self, forced: bool) -> BoxFuture<'static, Vec<NodeStatus>> {
        async move {
            match self {
                Member::Node(node) => {
                    let outcome = node.status(forced).await;
                    vec![NodeStatus { node, outcome }]
                }
                Member::Group(group) => match group.status(forced, false, false).await {
                    Ok(statuses) => statuses,
                    Err(e) => failed_statuses(&group.nodes(), &e.to_string()),
                },
            }
        }
        .boxed()
    }
}

impl From<Arc<Node>> for Member {
    fn from(node: Arc<Node>) -> Self {
        Member::Node(node)
    }
}

impl From<Node> for Member {
    fn from(node: Node) -> Self {
        Member::Node(Arc::new(node))
    }
}

impl From<CompositeNode> for Member {
    fn from(group: CompositeNode) -> Self {
        Member::Group(Arc::new(group))
    }
}

fn failed_statuses(nodes: &[Arc<Node>], reason: &str) -> Vec<NodeStatus> {
    nodes
        .iter()
        .map(|node| NodeStatus {
            node: Arc::clone(node),
            outcome: Outcome::failed(Output::None, reason),
        })
        .collect()
}

/// Releases the fan-out guard when dropped.
struct FanoutGuard<'a>(&'a AtomicBool);

impl Drop for FanoutGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A set of nodes addressed as one.
#[derive(Default)]
pub struct CompositeNode {
    id: String,
    members: BTreeMap<String, Member>,
    in_flight: AtomicBool,
    statuses: tokio::sync::Mutex<Option<Vec<NodeStatus>>>,
}

impl CompositeNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set with a name, used for enclosure groups.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a member unless one with the same id is already present.
    pub fn add(&mut self, member: impl Into<Member>) {
        let member = member.into();
        if self.members.contains_key(member.id()) {
            debug!("{} already in set, skipping", member.id());
            return;
        }
        self.members.insert(member.id().to_string(), member);
    }

    /// Merge the members of `other`, skipping ids already present.
    pub fn union(&mut self, other: &CompositeNode) {
        for (id, member) in &other.members {
            self.members
                .entry(id.clone())
                .or_insert_with(|| member.clone());
        }
    }

    pub fn get(&self, id: &str) -> Result<&Member, NodeError> {
        self.members
            .get(id)
            .ok_or_else(|| NodeError::NotFound { id: id.to_string() })
    }

    /// Like [`CompositeNode::get`] but only matches plain nodes.
    pub fn get_node(&self, id: &str) -> Result<Arc<Node>, NodeError> {
        match self.get(id)? {
            Member::Node(node) => Ok(Arc::clone(node)),
            Member::Group(_) => Err(NodeError::NotFound { id: id.to_string() }),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Direct members in ascending id order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// Every node in the set, nested groups flattened, sorted by id.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = self.members.values().flat_map(Member::nodes).collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// New set with the members for which `predicate` holds.
    pub fn filter(&self, predicate: impl Fn(&Member) -> bool) -> CompositeNode {
        let mut filtered = CompositeNode::with_id(self.id.clone());
        for member in self.members.values().filter(|m| predicate(m)) {
            filtered.add(member.clone());
        }
        filtered
    }

    /// Nodes whose master reports `state` among their scheduler states.
    pub async fn filter_by_scheduler_state(&self, state: &str) -> CompositeNode {
        let mut matching = BTreeSet::new();
        for node in self.nodes() {
            if node.has_scheduler_state(state).await {
                matching.insert(node.id().to_string());
            }
        }
        self.filter(|member| matches!(member, Member::Node(n) if matching.contains(n.id())))
    }

    /// Nodes located in `chassis`.
    pub fn nodes_from_chassis(&self, chassis: &str) -> CompositeNode {
        self.filter(|member| match member {
            Member::Node(node) => node.chassis() == Some(chassis),
            Member::Group(_) => false,
        })
    }

    /// Partition the nodes by enclosure. Nodes without a known enclosure
    /// share the [`NO_ENCLOSURE`] group.
    pub fn group_by_enclosure(&self) -> CompositeNode {
        let mut groups: BTreeMap<String, CompositeNode> = BTreeMap::new();
        for node in self.nodes() {
            let enclosure = node.chassis().unwrap_or(NO_ENCLOSURE).to_string();
            groups
                .entry(enclosure.clone())
                .or_insert_with(|| CompositeNode::with_id(enclosure))
                .add(node);
        }

        let mut grouped = CompositeNode::with_id(self.id.clone());
        for (_, group) in groups {
            grouped.add(group);
        }
        grouped
    }

    /// The master of the first node in the set.
    pub fn master(&self) -> Option<Arc<Node>> {
        self.nodes().first().and_then(|node| node.master())
    }

    pub fn has_specials(&self) -> bool {
        self.nodes().iter().any(|node| node.is_special())
    }

    pub fn queue(&self, action: Action) {
        for node in self.nodes() {
            node.queue(action);
        }
    }

    pub fn run_custom(&self, command: &str) {
        for node in self.nodes() {
            node.run_custom(command);
        }
    }

    pub fn run_component(&self, components: &[String]) {
        for node in self.nodes() {
            node.run_component(components);
        }
    }

    /// Queue one command on the master marking every node online.
    pub fn set_online(&self) -> Result<(), NodeError> {
        let master = self.master_for("set online")?;
        master.set_online(&self.nodenames());
        Ok(())
    }

    /// Queue one command on the master marking every node offline.
    pub fn set_offline(&self) -> Result<(), NodeError> {
        let master = self.master_for("set offline")?;
        master.set_offline(&self.nodenames());
        Ok(())
    }

    pub fn fix_down_on_error(&self) -> Result<(), NodeError> {
        if self.is_empty() {
            return Err(NodeError::NoNodesSelected {
                action: "fix downonerror on".to_string(),
            });
        }
        self.queue(Action::FixDownOnError);
        Ok(())
    }

    fn nodenames(&self) -> Vec<String> {
        self.nodes().iter().map(|n| n.nodename().to_string()).collect()
    }

    fn master_for(&self, action: &str) -> Result<Arc<Node>, NodeError> {
        let nodes = self.nodes();
        let first = nodes.first().ok_or_else(|| NodeError::NoNodesSelected {
            action: action.to_string(),
        })?;
        first.master().ok_or_else(|| NodeError::MissingMaster {
            id: first.id().to_string(),
        })
    }

    /// Queued commands per node, as `<id>:[<command>, ...]`.
    pub fn show_commands(&self) -> Vec<String> {
        self.nodes()
            .iter()
            .map(|node| format!("{}:[{}]", node.id(), node.show_commands().join(", ")))
            .collect()
    }

    fn begin_fanout(&self) -> Result<FanoutGuard<'_>, NodeError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NodeError::FanoutInProgress)?;
        Ok(FanoutGuard(&self.in_flight))
    }

    fn batches(&self, group_by_enclosure: bool) -> Vec<Member> {
        if group_by_enclosure {
            self.group_by_enclosure().members.into_values().collect()
        } else {
            self.members.values().cloned().collect()
        }
    }

    /// Run every node's queue.
    ///
    /// Threaded runs spawn one task per member, or one per enclosure when
    /// `group_by_enclosure` is set so that each enclosure only ever sees one
    /// command at a time. Reports come back sorted by node id.
    pub async fn run_all(
        &self,
        threaded: bool,
        group_by_enclosure: bool,
    ) -> Result<Vec<NodeReport>, NodeError> {
        let _guard = self.begin_fanout()?;

        let mut reports = if threaded {
            fan_out(self.batches(group_by_enclosure), Member::run_all, |member, e| {
                member
                    .nodes()
                    .iter()
                    .map(|node| NodeReport::failed(node.id(), format!("task failed: {e}")))
                    .collect()
            })
            .await
        } else {
            let mut reports = Vec::new();
            for member in self.members.values() {
                reports.extend(member.clone().run_all().await);
            }
            reports
        };

        reports.sort_by(|a, b| a.target.cmp(&b.target));
        Ok(reports)
    }

    /// Status of every node, fanned out like [`CompositeNode::run_all`].
    ///
    /// The result is remembered unless `forced`.
    pub async fn status(
        &self,
        forced: bool,
        threaded: bool,
        group_by_enclosure: bool,
    ) -> Result<Vec<NodeStatus>, NodeError> {
        let _guard = self.begin_fanout()?;
        let mut cached = self.statuses.lock().await;
        if !forced {
            if let Some(statuses) = cached.as_ref() {
                return Ok(statuses.clone());
            }
        }

        let mut statuses = if threaded {
            fan_out(
                self.batches(group_by_enclosure),
                move |member| member.status(forced),
                |member, e| failed_statuses(&member.nodes(), &format!("task failed: {e}")),
            )
            .await
        } else {
            let mut statuses = Vec::new();
            for member in self.members.values() {
                statuses.extend(member.clone().status(forced).await);
            }
            statuses
        };

        statuses.sort_by(|a, b| a.node.id().cmp(b.node.id()));
        *cached = Some(statuses.clone());
        Ok(statuses)
    }
}

/// Spawn `work` once per batch and wait for all of them.
///
/// A task that dies is reported through `on_failure` under the identity of
/// its batch instead of taking the whole fan-out down.
async fn fan_out<T, W, F>(batches: Vec<Member>, work: W, on_failure: F) -> Vec<T>
where
    T: Send + 'static,
    W: Fn(Member) -> BoxFuture<'static, Vec<T>>,
    F: Fn(&Member, &JoinError) -> Vec<T>,
{
    debug!("starting {} tasks", batches.len());
    let handles: Vec<_> = batches
        .iter()
        .cloned()
        .map(|member| tokio::spawn(work(member)))
        .collect();

    let mut results = Vec::new();
    for (member, joined) in batches.iter().zip(join_all(handles).await) {
        match joined {
            Ok(items) => results.extend(items),
            Err(e) => {
                error!("task for {} failed: {}", member.id(), e);
                results.extend(on_failure(member, &e));
            }
        }
    }
    results
}

impl Clone for CompositeNode {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            members: self.members.clone(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for CompositeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeNode")
            .field("id", &self.id)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for CompositeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.members.is_empty() {
            write!(f, "Empty CompositeNode")
        } else {
            write!(f, "[{}]", self.ids().join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, LocalCommand};
    use crate::config::Config;
    use crate::inventory::Location;
    use crate::node::{Management, Role};
    use std::time::{Duration, Instant};

    fn test_node(id: &str) -> Node {
        Node::builder(id, "testcluster", Role::Worker, Management::Test)
            .build(&Config::builtin_defaults())
            .unwrap()
    }

    fn node_in(id: &str, chassis: Option<&str>) -> Node {
        Node::builder(id, "testcluster", Role::Worker, Management::Test)
            .location(Location {
                slot: Some(1),
                chassis: chassis.map(str::to_string),
            })
            .build(&Config::builtin_defaults())
            .unwrap()
    }

    #[test]
    fn test_nodes_are_sorted() {
        let mut set = CompositeNode::new();
        for id in ["node003", "node001", "node002"] {
            set.add(test_node(id));
        }
        assert_eq!(set.ids(), vec!["node001", "node002", "node003"]);
        assert_eq!(set.to_string(), "[node001, node002, node003]");
        assert_eq!(CompositeNode::new().to_string(), "Empty CompositeNode");
    }

    #[test]
    fn test_union_skips_existing_ids() {
        let first = Arc::new(test_node("node001"));
        let mut a = CompositeNode::new();
        a.add(Arc::clone(&first));
        let mut b = CompositeNode::new();
        b.add(test_node("node001"));
        b.add(test_node("node002"));

        a.union(&b);
        a.union(&b);
        assert_eq!(a.len(), 2);
        assert!(matches!(a.get("node001").unwrap(), Member::Node(n) if Arc::ptr_eq(n, &first)));
        assert!(matches!(a.get("node999"), Err(NodeError::NotFound { .. })));
    }

    #[test]
    fn test_group_by_enclosure() {
        let mut set = CompositeNode::new();
        set.add(node_in("node001", Some("chassis1")));
        set.add(node_in("node002", Some("chassis2")));
        set.add(node_in("node003", Some("chassis1")));
        set.add(node_in("node004", None));

        let grouped = set.group_by_enclosure();
        assert_eq!(grouped.ids(), vec!["None", "chassis1", "chassis2"]);
        let Member::Group(chassis1) = grouped.get("chassis1").unwrap() else {
            panic!("expected a group");
        };
        assert_eq!(chassis1.ids(), vec!["node001", "node003"]);
        assert_eq!(grouped.nodes().len(), 4);
        assert_eq!(set.nodes_from_chassis("chassis2").ids(), vec!["node002"]);
    }

    #[tokio::test]
    async fn test_threaded_run_overlaps() {
        let mut set = CompositeNode::new();
        for i in 0..4 {
            let node = test_node(&format!("node00{i}"));
            node.queue_command(Command::Local(LocalCommand::new(
                "sleep 1",
                Duration::from_secs(10),
            )));
            set.add(node);
        }

        let start = Instant::now();
        let reports = set.run_all(true, false).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(3500));
        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| !r.has_errors()));
        assert_eq!(reports[0].target, "node000");
    }

    #[tokio::test]
    async fn test_reentrant_fanout_is_refused() {
        let set = CompositeNode::new();
        let _guard = set.begin_fanout().unwrap();
        assert!(matches!(
            set.run_all(true, false).await,
            Err(NodeError::FanoutInProgress)
        ));
    }

    #[tokio::test]
    async fn test_guard_is_released() {
        let mut set = CompositeNode::new();
        set.add(test_node("node001"));
        set.run_all(false, false).await.unwrap();
        set.run_all(true, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_is_memoized_per_set() {
        let mut set = CompositeNode::new();
        set.add(test_node("node002"));
        set.add(test_node("node001"));

        let first = set.status(false, true, false).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].node.id(), "node001");
        let again = set.status(false, true, false).await.unwrap();
        assert_eq!(first[1].outcome, again[1].outcome);
    }

    #[test]
    fn test_set_online_needs_nodes() {
        let set = CompositeNode::new();
        assert!(matches!(
            set.set_online(),
            Err(NodeError::NoNodesSelected { .. })
        ));
        assert!(matches!(
            set.fix_down_on_error(),
            Err(NodeError::NoNodesSelected { .. })
        ));
    }

    #[test]
    fn test_show_commands() {
        let mut set = CompositeNode::new();
        set.add(test_node("node001"));
        set.queue(Action::SoftReboot);
        assert_eq!(
            set.show_commands(),
            vec!["node001:[going to run on localhost: softreboot on node001.testcluster]"]
        );
    }
}
