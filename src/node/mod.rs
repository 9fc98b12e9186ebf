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

//! Cluster nodes, their action slots and node sets.
//!
//! A [`Node`] owns a fixed map from [`Action`] to the [`Command`] that
//! performs it on this node's hardware, plus a queue of commands waiting to
//! run. Queuing never executes anything; [`Node::run_all`] does, in order.

mod action;
mod composite;
mod error;
mod profile;
mod report;

pub use action::Action;
pub use composite::{CompositeNode, Member};
pub use error::NodeError;
pub use profile::{Management, Role};
pub use report::{CommandRecord, NodeReport, NodeStatus};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::command::{Command, Outcome, Output, SchedulerStateSource};
use crate::config::Config;
use crate::inventory::{Inventory, Location};

use profile::{Blueprint, SchedulerCommands, Shell};

/// Builds a [`Node`] from its identity and the cluster's configuration.
#[derive(Debug)]
pub struct NodeBuilder {
    id: String,
    cluster: String,
    role: Role,
    management: Management,
    master: Option<Arc<Node>>,
    inventory: Option<Arc<Inventory>>,
    location: Option<Location>,
    overrides: Vec<(Action, Command)>,
}

impl NodeBuilder {
    /// The master this node reports to. Ignored for masters themselves.
    pub fn master(mut self, master: Arc<Node>) -> Self {
        self.master = Some(master);
        self
    }

    pub fn inventory(mut self, inventory: Arc<Inventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Use this location instead of asking the inventory.
    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Bind `action` to `command` regardless of the profiles.
    pub fn slot(mut self, action: Action, command: Command) -> Self {
        self.overrides.push((action, command));
        self
    }

    pub fn build(self, config: &Config) -> Result<Node, NodeError> {
        let params = [("nodeid", self.id.as_str()), ("clustername", self.cluster.as_str())];
        let hostname = config.render("host_tpl", &params)?;
        let nodename = config.render("nodename_tpl", &params)?;

        let location = match (self.location, self.management) {
            (Some(location), _) => Some(Some(location)),
            (None, Management::Blade) => {
                let inventory = self.inventory.as_ref().ok_or_else(|| NodeError::Location {
                    id: self.id.clone(),
                    reason: "no inventory available".to_string(),
                })?;
                let location = inventory
                    .location(&self.id)
                    .map_err(|e| NodeError::from_inventory(&self.id, e))?;
                Some(Some(location))
            }
            (None, _) => None,
        };

        let master = match self.role {
            Role::Master => None,
            _ => self.master,
        };

        let assembly = Blueprint {
            config,
            id: &self.id,
            cluster: &self.cluster,
            role: self.role,
            management: self.management,
            hostname: &hostname,
            master: master.as_ref(),
            location: location.as_ref().and_then(Option::as_ref),
        }
        .assemble()?;

        let mut slots = assembly.slots;
        slots.extend(self.overrides);

        debug!(
            "created {:?} node {} ({}) with {} slots",
            self.role,
            self.id,
            self.management,
            slots.len()
        );

        Ok(Node {
            id: self.id,
            cluster: self.cluster,
            role: self.role,
            management: self.management,
            hostname,
            admin_host: assembly.admin_host,
            nodename,
            monitoring_alias: assembly.monitoring_alias,
            master,
            slots,
            status_command: assembly.status,
            shell: assembly.shell,
            scheduler: assembly.scheduler.map(|commands| Scheduler {
                commands,
                listing: tokio::sync::OnceCell::new(),
            }),
            inventory: self.inventory,
            location: location.map(OnceCell::with_value).unwrap_or_default(),
            queue: Mutex::new(Vec::new()),
            status: tokio::sync::Mutex::new(None),
        })
    }
}

#[derive(Debug)]
struct Scheduler {
    commands: SchedulerCommands,
    listing: tokio::sync::OnceCell<Outcome>,
}

/// One addressable member of the fleet.
pub struct Node {
    id: String,
    cluster: String,
    role: Role,
    management: Management,
    hostname: String,
    admin_host: String,
    nodename: String,
    monitoring_alias: Option<String>,
    master: Option<Arc<Node>>,
    slots: BTreeMap<Action, Command>,
    status_command: Command,
    shell: Shell,
    scheduler: Option<Scheduler>,
    inventory: Option<Arc<Inventory>>,
    location: OnceCell<Option<Location>>,
    queue: Mutex<Vec<Command>>,
    status: tokio::sync::Mutex<Option<Outcome>>,
}

impl Node {
    pub fn builder(
        id: impl Into<String>,
        cluster: impl Into<String>,
        role: Role,
        management: Management,
    ) -> NodeBuilder {
        NodeBuilder {
            id: id.into(),
            cluster: cluster.into(),
            role,
            management,
            master: None,
            inventory: None,
            location: None,
            overrides: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn management(&self) -> Management {
        self.management
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Host of the out of band management controller.
    pub fn admin_host(&self) -> &str {
        &self.admin_host
    }

    /// Name of this node as the batch scheduler knows it.
    pub fn nodename(&self) -> &str {
        &self.nodename
    }

    /// Name of the management controller in the monitoring system, if any.
    pub fn monitoring_alias(&self) -> Option<&str> {
        self.monitoring_alias.as_deref()
    }

    pub fn is_special(&self) -> bool {
        self.role.is_special()
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// The master of this node; a master is its own master.
    pub fn master(self: &Arc<Self>) -> Option<Arc<Node>> {
        if self.is_master() {
            Some(Arc::clone(self))
        } else {
            self.master.clone()
        }
    }

    /// Physical location, looked up once and remembered.
    ///
    /// `None` when the inventory has no usable answer.
    pub fn location(&self) -> Option<&Location> {
        self.location
            .get_or_init(|| {
                let inventory = self.inventory.as_ref()?;
                match inventory.location(&self.id) {
                    Ok(location) => Some(location),
                    Err(e) => {
                        debug!("no location for {}: {}", self.id, e);
                        None
                    }
                }
            })
            .as_ref()
    }

    pub fn chassis(&self) -> Option<&str> {
        self.location().and_then(|l| l.chassis.as_deref())
    }

    pub fn slot(&self) -> Option<u32> {
        self.location().and_then(|l| l.slot)
    }

    /// The command bound to `action`, if the hardware supports it.
    pub fn command(&self, action: Action) -> Option<&Command> {
        self.slots.get(&action)
    }

    pub fn supports(&self, action: Action) -> bool {
        self.slots.contains_key(&action)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Command>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `action`. Unsupported actions queue a placeholder that reports
    /// "Not supported yet" when run.
    pub fn queue(&self, action: Action) {
        let command = match self.slots.get(&action) {
            Some(command) => command.clone(),
            None => {
                warn!("{} is not supported on {}", action, self.id);
                Command::NotSupported(action.name().to_string())
            }
        };
        self.queue_command(command);
    }

    pub fn queue_command(&self, command: Command) {
        debug!("queueing on {}: {}", self.id, command);
        self.pending().push(command);
    }

    /// Queue an arbitrary shell command on this node.
    pub fn run_custom(&self, command: &str) {
        self.queue_command(self.shell.command(command));
    }

    /// Queue a run of the given configuration components.
    pub fn run_component(&self, components: &[String]) {
        self.run_custom(&format!("ncm-ncd --co {}", components.join(" ")));
    }

    /// Queue marking `nodenames` online in the scheduler. Masters only.
    pub fn set_online(&self, nodenames: &[String]) {
        self.queue_scheduler_edit("setonline", "pbsnodes -c", nodenames);
    }

    /// Queue marking `nodenames` offline in the scheduler. Masters only.
    pub fn set_offline(&self, nodenames: &[String]) {
        self.queue_scheduler_edit("setoffline", "pbsnodes -o", nodenames);
    }

    fn queue_scheduler_edit(&self, request: &str, verb: &str, nodenames: &[String]) {
        if !self.is_master() {
            self.queue_command(Command::NotSupported(request.to_string()));
            return;
        }
        let command = nodenames
            .iter()
            .map(|name| format!("{verb} {name} "))
            .collect::<Vec<_>>()
            .join(";");
        self.run_custom(&command);
    }

    /// What [`Node::run_all`] would execute, in order.
    pub fn show_commands(&self) -> Vec<String> {
        self.pending().iter().map(|c| c.to_string()).collect()
    }

    /// Run every queued command in order.
    ///
    /// The queue is not cleared, so running again repeats the same commands.
    /// A failing command does not stop the ones after it.
    pub async fn run_all(&self) -> Vec<CommandRecord> {
        let commands: Vec<Command> = self.pending().clone();
        let mut records = Vec::with_capacity(commands.len());
        for command in commands {
            debug!("running on {}: {}", self.id, command);
            let outcome = command.run().await;
            if let Some(error) = &outcome.error {
                tracing::info!("{} reported a problem: {}", self.id, error);
            }
            records.push(CommandRecord { command, outcome });
        }
        records
    }

    /// Run the status command, reusing an earlier result unless `forced`.
    pub async fn status(&self, forced: bool) -> Outcome {
        let mut cached = self.status.lock().await;
        if !forced {
            if let Some(outcome) = cached.as_ref() {
                return outcome.clone();
            }
        }
        let outcome = self.status_command.run().await;
        debug!("status of {}: {:?}", self.id, outcome);
        *cached = Some(outcome.clone());
        outcome
    }

    /// Scheduler state of every node this master knows about.
    ///
    /// The listing runs at most once per node, failed attempts included.
    /// Concurrent callers share the one running attempt.
    pub async fn scheduler_states(&self) -> Outcome {
        let Some(scheduler) = &self.scheduler else {
            return Outcome::failed(
                Output::None,
                format!("{} is not a master", self.id),
            );
        };

        scheduler
            .listing
            .get_or_init(|| scheduler.commands.list.run())
            .await
            .clone()
    }

    /// Ids of the workers this master schedules on.
    pub async fn worker_ids(&self) -> Vec<String> {
        match self.scheduler_states().await.output {
            Output::States(states) => states.into_keys().collect(),
            _ => Vec::new(),
        }
    }

    /// Quick liveness check used when electing a master. Never cached.
    pub async fn probe_scheduler(&self) -> Outcome {
        match &self.scheduler {
            Some(scheduler) => scheduler.commands.probe.run().await,
            None => Outcome::failed(Output::None, format!("{} is not a master", self.id)),
        }
    }

    /// Scheduler state of this node according to its master.
    pub async fn scheduler_state(self: &Arc<Self>) -> Outcome {
        match self.master() {
            Some(master) => master.scheduler_state_for(&self.id).await,
            None => Outcome::failed(Output::None, format!("{} has no master", self.id)),
        }
    }

    /// Whether the scheduler lists `state` (`down`, `offline`, `free`, ...)
    /// among this node's states.
    pub async fn has_scheduler_state(self: &Arc<Self>, state: &str) -> bool {
        self.scheduler_state()
            .await
            .as_text()
            .map(|states| states.split(',').any(|s| s.trim() == state))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SchedulerStateSource for Node {
    async fn scheduler_state_for(&self, node_id: &str) -> Outcome {
        let outcome = self.scheduler_states().await;
        match &outcome.output {
            Output::States(states) => match states.get(node_id) {
                Some(state) => Outcome::new(Output::Text(state.clone()), outcome.error),
                None => Outcome::failed(
                    Output::None,
                    format!("PbsStatus for {} not found on {}", node_id, self.id),
                ),
            },
            _ => Outcome::new(Output::None, outcome.error),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("cluster", &self.cluster)
            .field("role", &self.role)
            .field("management", &self.management)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{LocalCommand, NOT_SUPPORTED};
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::builtin_defaults();
        config.merge(Config::from_pairs([
            ("imm_tpl", "{nodeid}-mgmt.{clustername}"),
            ("imm_user_raichu", "ADMIN"),
            ("immpasswd", "hunter2"),
            ("dracpasswd", "calvin"),
            ("bladeuser", "USERID"),
            ("bladepasswd", "PASSW0RD"),
            ("chasis_host_tpl", "mmodule{chassisname}.{clustername}"),
        ]));
        config
    }

    fn master(management: Management) -> Arc<Node> {
        Arc::new(
            Node::builder("master1", "raichu", Role::Master, management)
                .build(&config())
                .unwrap(),
        )
    }

    #[test]
    fn test_ipmi_worker_slots() {
        let node = Node::builder("node001", "raichu", Role::Worker, Management::Ipmi)
            .master(master(Management::Ipmi))
            .build(&config())
            .unwrap();

        assert_eq!(node.hostname(), "node001.raichu");
        assert_eq!(node.admin_host(), "node001-mgmt.raichu");
        assert!(!node.is_special());
        assert_eq!(
            node.command(Action::PowerOn).unwrap().describe(),
            "sudo ipmitool -I lanplus -H node001-mgmt.raichu -U ADMIN -P '***' chassis power on"
        );
        assert_eq!(
            node.command(Action::PbsMomCleanup).unwrap().describe(),
            "SshCommand: root@node001.raichu:22 command: export PBS_HOME=/var/spool/pbs && export PBS_SERVER=master1 && /var/spool/pbs/scripts/cleanup"
        );
        assert!(!node.supports(Action::LedOn));
        assert!(!node.supports(Action::PauseScheduler));
    }

    #[test]
    fn test_dmtf_adds_led_slots() {
        let node = Node::builder("node001", "raichu", Role::Worker, Management::DmtfIpmi)
            .build(&config())
            .unwrap();
        assert_eq!(
            node.command(Action::LedOn).unwrap().describe(),
            "SshCommand: USERID@node001-mgmt.raichu:22 command: start /system1/led1"
        );
    }

    #[test]
    fn test_master_slots() {
        let master = master(Management::Drac);
        assert!(master.is_special());
        assert_eq!(
            master.command(Action::PbsMomStop).unwrap().describe(),
            "No pbsmom on the masters!"
        );
        assert_eq!(
            master.command(Action::RestartScheduler).unwrap().describe(),
            "SshCommand: root@master1.raichu:22 command: sudo mschedctl -R"
        );
        assert_eq!(
            master.command(Action::HardReboot).unwrap().describe(),
            "idracadm -r master1-mgmt.raichu -u root -p '***' serveraction hardreset"
        );
        assert!(Arc::ptr_eq(&master.master().unwrap(), &master));
    }

    #[test]
    fn test_blade_needs_location() {
        let err = Node::builder("node601", "shuppet", Role::Worker, Management::Blade)
            .build(&config())
            .unwrap_err();
        assert!(matches!(err, NodeError::Location { .. }));

        let node = Node::builder("node601", "shuppet", Role::Worker, Management::Blade)
            .location(Location {
                slot: Some(4),
                chassis: Some("07".to_string()),
            })
            .build(&config())
            .unwrap();
        assert_eq!(node.admin_host(), "mmodule07.shuppet");
        assert_eq!(node.chassis(), Some("07"));
        assert_eq!(
            node.command(Action::SoftPowerOff).unwrap().describe(),
            "SshCommand: USERID@mmodule07.shuppet:22 command: power -softoff -T system:blade[4]"
        );
    }

    #[tokio::test]
    async fn test_unsupported_action_is_reported_not_raised() {
        let node = Node::builder("node001", "raichu", Role::Worker, Management::Ipmi)
            .build(&config())
            .unwrap();
        node.queue(Action::LedOn);

        let records = node.run_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome.output, Output::Text("ledon".into()));
        assert_eq!(records[0].outcome.error.as_deref(), Some(NOT_SUPPORTED));
    }

    #[tokio::test]
    async fn test_queue_runs_in_order_and_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let node = Node::builder("node001", "testcluster", Role::Worker, Management::Test)
            .build(&config())
            .unwrap();
        for step in ["one", "two"] {
            node.queue_command(Command::Local(LocalCommand::new(
                format!("echo {step} >> {}", log.display()),
                Duration::from_secs(5),
            )));
        }
        node.queue_command(Command::Local(LocalCommand::new("false", Duration::from_secs(5))));
        node.queue(Action::PowerOn);

        let first = node.run_all().await;
        assert_eq!(first.len(), 4);
        assert_eq!(first[2].outcome.error.as_deref(), Some("exitcode: 1"));
        assert_eq!(
            first[3].outcome.as_text(),
            Some("running testcommand: poweron on node001.testcluster")
        );

        node.run_all().await;
        assert_eq!(
            std::fs::read_to_string(&log).unwrap(),
            "one\ntwo\none\ntwo\n"
        );
    }

    #[test]
    fn test_set_online_joins_names_on_master() {
        let master = master(Management::Test);
        master.set_online(&["node001.raichu".to_string(), "node002.raichu".to_string()]);
        assert_eq!(
            master.show_commands(),
            vec!["going to run on localhost: pbsnodes -c node001.raichu ;pbsnodes -c node002.raichu  on master1.raichu"]
        );

        let worker = Node::builder("node001", "raichu", Role::Worker, Management::Test)
            .build(&config())
            .unwrap();
        worker.set_offline(&["node001.raichu".to_string()]);
        assert_eq!(
            worker.show_commands(),
            vec!["going to run on localhost: setoffline"]
        );
    }

    #[test]
    fn test_run_component() {
        let node = Node::builder("node001", "raichu", Role::Worker, Management::Ipmi)
            .build(&config())
            .unwrap();
        node.run_component(&["spma".to_string(), "cron".to_string()]);
        assert_eq!(
            node.show_commands(),
            vec!["going to run on node001.raichu: SshCommand: root@node001.raichu:22 command: ncm-ncd --co spma cron"]
        );
    }

    #[tokio::test]
    async fn test_missing_scheduler_state() {
        let master = master(Management::Test);
        let worker = Arc::new(
            Node::builder("node001", "raichu", Role::Worker, Management::Test)
                .master(Arc::clone(&master))
                .build(&config())
                .unwrap(),
        );
        let outcome = worker.scheduler_state().await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("PbsStatus for node001 not found on master1")
        );
        assert!(!worker.has_scheduler_state("free").await);
    }

    #[tokio::test]
    async fn test_status_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("count");
        let node = Node::builder("node001", "raichu", Role::Worker, Management::Test)
            .build(&config())
            .unwrap();
        let node = Node {
            status_command: Command::Local(LocalCommand::new(
                format!("echo x >> {}", marker.display()),
                Duration::from_secs(5),
            )),
            ..node
        };

        node.status(false).await;
        node.status(false).await;
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "x\n");
        node.status(true).await;
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "x\nx\n");
    }

    #[tokio::test]
    async fn test_failed_listing_is_shared_by_workers() {
        let master = Node::builder("master1", "raichu", Role::Master, Management::Test)
            .build(&config())
            .unwrap();
        let slow = || Command::Local(LocalCommand::new("sleep 1; exit 1", Duration::from_secs(10)));
        let master = Arc::new(Node {
            scheduler: Some(Scheduler {
                commands: SchedulerCommands {
                    list: slow(),
                    probe: slow(),
                },
                listing: tokio::sync::OnceCell::new(),
            }),
            ..master
        });

        let mut set = CompositeNode::new();
        for id in ["node001", "node002", "node003", "node004"] {
            set.add(
                Node::builder(id, "raichu", Role::Worker, Management::Test)
                    .master(Arc::clone(&master))
                    .build(&config())
                    .unwrap(),
            );
        }

        let start = std::time::Instant::now();
        let statuses = set.status(false, true, false).await.unwrap();
        assert_eq!(statuses.len(), 4);
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());

        let start = std::time::Instant::now();
        let outcome = master.scheduler_states().await;
        assert_eq!(outcome.error.as_deref(), Some("exitcode: 1"));
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
