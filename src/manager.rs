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

//! Turns one set of options into selected nodes, queued actions and a run.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::command::Output;
use crate::config::Config;
use crate::monitoring::Icinga;
use crate::node::{Action, CompositeNode, NodeReport};
use crate::selector;

/// Everything the user asked for in one invocation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    // general
    pub forced: bool,
    pub test_run: bool,
    pub non_threaded: bool,
    pub cluster: Option<String>,

    // selection
    pub idle: bool,
    pub worker: bool,
    pub down: bool,
    pub offline: bool,
    pub node: Option<String>,
    pub master: Option<String>,
    pub storage: bool,
    pub chassis: Option<String>,
    pub quattor: bool,
    pub all_nodes: bool,

    // node actions
    pub state: bool,
    pub setoffline: bool,
    pub setonline: bool,
    pub pbsmomcleanup: bool,
    pub pbsmomstop: bool,
    pub runcmd: Option<String>,
    pub pbsmomstatus: bool,
    pub poweroff: bool,
    pub powercut: bool,
    pub poweron: bool,
    pub reboot: bool,
    pub hardreboot: bool,
    pub pbsmomrestart: bool,
    pub ledon: bool,
    pub ledoff: bool,
    pub fix_downonerror: bool,
    pub co: Option<String>,

    // cluster actions
    pub pause: bool,
    pub resume: bool,
    pub restart: bool,

    // monitoring
    pub ack: bool,
    pub ack_service: Option<String>,
    pub downtime: Option<String>,
    pub comment: Option<String>,
    pub imms: bool,
}

/// What [`Manager::doit`] ended up doing.
#[derive(Debug)]
pub enum RunOutcome {
    /// A safety check failed; nothing was run.
    Refused(String),
    /// Test run: the commands that would have run.
    DryRun(Vec<String>),
    /// One report per node, sorted by id, followed by the monitoring report.
    Completed(Vec<NodeReport>),
}

#[derive(Debug)]
pub struct Manager {
    options: Options,
    cluster: Cluster,
    nodes: CompositeNode,
    monitoring: Icinga,
    status_report: Option<String>,
}

impl Manager {
    /// Resolve the cluster named in `options` (or the one this host is in)
    /// and build a manager for it.
    pub async fn new(config: Arc<Config>, options: Options) -> Result<Self> {
        let cluster = match &options.cluster {
            Some(name) => Cluster::get(name, config).context("Failed to select cluster")?,
            None => {
                let cluster =
                    Cluster::for_this_host(config).context("Failed to guess the cluster")?;
                warn!("Selected cluster {} as default cluster", cluster);
                cluster
            }
        };
        Self::with_cluster(cluster, options).await
    }

    /// Select nodes on `cluster` and queue every requested action.
    pub async fn with_cluster(cluster: Cluster, options: Options) -> Result<Self> {
        let nodes = select_nodes(&cluster, &options).await?;
        info!("selected nodes on cluster {}: {}", cluster, nodes);

        let monitoring = Icinga::new(Arc::clone(cluster.config()), nodes.nodes(), options.imms);

        let mut manager = Self {
            options,
            cluster,
            nodes,
            monitoring,
            status_report: None,
        };
        manager.queue_actions().await?;
        Ok(manager)
    }

    pub fn nodes(&self) -> &CompositeNode {
        &self.nodes
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn monitoring(&self) -> &Icinga {
        &self.monitoring
    }

    /// Status table gathered when `state` was requested.
    pub fn status_report(&self) -> Option<&str> {
        self.status_report.as_deref()
    }

    /// Whether a master or storage node is selected.
    pub fn has_specials(&self) -> bool {
        self.nodes.has_specials()
    }

    async fn queue_actions(&mut self) -> Result<()> {
        let options = self.options.clone();
        if options.state {
            self.status_report = Some(self.status_table().await?);
        }

        let nodes = &self.nodes;

        if options.ledon {
            nodes.queue(Action::LedOn);
        }
        if options.ledoff {
            nodes.queue(Action::LedOff);
        }
        if options.pbsmomcleanup {
            nodes.queue(Action::PbsMomCleanup);
        }
        if options.fix_downonerror {
            nodes.fix_down_on_error()?;
        }
        if let Some(components) = &options.co {
            let components: Vec<String> = components.split(',').map(str::to_string).collect();
            nodes.run_component(&components);
        }
        if options.setoffline {
            nodes.set_offline()?;
        }
        if options.pbsmomstop {
            nodes.queue(Action::PbsMomStop);
        }
        if let Some(command) = &options.runcmd {
            nodes.run_custom(command);
        }
        if options.pbsmomstatus {
            nodes.queue(Action::PbsMomStatus);
        }
        if options.poweroff {
            nodes.queue(Action::SoftPowerOff);
        }
        if options.powercut {
            nodes.queue(Action::PowerCut);
        }
        if options.poweron {
            nodes.queue(Action::PowerOn);
        }
        if options.reboot {
            nodes.queue(Action::SoftReboot);
        }
        if options.hardreboot {
            nodes.queue(Action::HardReboot);
        }
        if options.setonline {
            nodes.set_online()?;
        }
        if options.pbsmomrestart {
            nodes.queue(Action::PbsMomRestart);
        }

        let config = Arc::clone(self.cluster.config());
        let mut downtime = options.downtime.clone();
        if (options.poweroff || options.hardreboot || options.powercut || options.reboot)
            && downtime.is_none()
        {
            let default = config.get("down_time")?;
            warn!("No downtime scheduled, Scheduling {} by default", default);
            downtime = Some(default);
        }

        if options.pause || options.resume || options.restart {
            let master = self.cluster.master().await?;
            for (requested, action) in [
                (options.pause, Action::PauseScheduler),
                (options.resume, Action::ResumeScheduler),
                (options.restart, Action::RestartScheduler),
            ] {
                if requested {
                    master.queue(action);
                }
            }
        }

        let comment = options.comment.as_deref();
        if options.ack {
            self.monitoring.acknowledge_host(comment)?;
        }
        if let Some(service) = &options.ack_service {
            self.monitoring.acknowledge_service(service, comment)?;
        }
        if let Some(downtime) = downtime {
            let default = config.get_f64("down_time")?;
            let hours = match downtime.split('h').next().map(str::trim).map(str::parse::<f64>) {
                Some(Ok(hours)) => hours,
                _ => {
                    warn!(
                        "No valid downtime supplied: {}, using {} by default",
                        downtime, default
                    );
                    default
                }
            };
            self.monitoring.schedule_downtime(hours, comment)?;
        }

        Ok(())
    }

    /// Run everything that was queued.
    ///
    /// Refuses when special nodes are selected or the scheduler is restarted
    /// without `forced`. The master is always part of the run so actions
    /// queued on it execute even when it was not selected.
    pub async fn doit(&mut self) -> Result<RunOutcome> {
        if self.has_specials() {
            info!("Selected nodes include special nodes (storage, masters,...)");
            if !self.options.forced {
                let msg = "You are selecting special nodes (storage, masters,...) without the --forced option\nAborting";
                warn!("{}", msg);
                return Ok(RunOutcome::Refused(msg.to_string()));
            }
        }

        if self.options.restart && !self.options.forced {
            let msg = "You are trying to restart the scheduler without the --forced option, do you know what you are doing?\nAborting";
            warn!("{}", msg);
            return Ok(RunOutcome::Refused(msg.to_string()));
        }

        let master = self.cluster.master().await?;
        if !self.nodes.contains(master.id()) {
            info!("Master not in selected nodes, adding it");
            self.nodes.add(master);
        }

        let mut commands = self.nodes.show_commands();
        commands.extend(self.monitoring.show_commands());
        if self.options.test_run {
            info!("was going to run {:?}", commands);
            return Ok(RunOutcome::DryRun(commands));
        }
        info!("Going to run: {:?}", commands);

        let monitoring = self.monitoring.run_all().await;
        debug!("monitoring output: {:?}", monitoring);

        let mut reports = self
            .nodes
            .run_all(!self.options.non_threaded, self.cluster.group_by_chassis())
            .await?;
        reports.push(monitoring);
        info!("Done it");
        Ok(RunOutcome::Completed(reports))
    }

    /// Status of the selected nodes as a printable table.
    pub async fn status_table(&self) -> Result<String> {
        let header =
            "\nNodes - Chassis interface - Location         tcpping - alivessh - pbs state - hwstate \n";
        let mut txt = String::from(header);
        txt.push_str(&"-".repeat(header.len()));
        txt.push('\n');

        let statuses = self
            .nodes
            .status(
                false,
                !self.options.non_threaded,
                self.cluster.group_by_chassis(),
            )
            .await?;

        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for status in &statuses {
            let results = match &status.outcome.output {
                Output::Many(children) => children
                    .iter()
                    .map(|c| c.output.to_string())
                    .collect::<Vec<_>>(),
                other => vec![other.to_string()],
            };
            let node_errors = status.outcome.errors();
            if !node_errors.is_empty() {
                errors.insert(status.node.id().to_string(), node_errors);
            }

            let node = &status.node;
            txt.push_str(&format!(
                "{:<7} {:<19} {:<16} [{}]\n",
                node.id(),
                node.chassis().unwrap_or("None"),
                node.slot().map_or_else(|| "None".to_string(), |s| s.to_string()),
                results.join(", ")
            ));
        }

        if !errors.is_empty() {
            txt.push_str("Errors occured:\n    ");
            let lines: Vec<String> = errors
                .iter()
                .map(|(id, errs)| format!("{id}: [{}]", errs.join(", ")))
                .collect();
            txt.push_str(&lines.join("\n    "));
            txt.push('\n');
        }
        info!("getStatus in master: {}", txt);
        Ok(txt)
    }
}

async fn select_nodes(cluster: &Cluster, options: &Options) -> Result<CompositeNode> {
    let mut nodes = CompositeNode::new();

    if let Some(chassis) = &options.chassis {
        debug!("option chassis: {}", chassis);
        nodes.union(&cluster.nodes_from_chassis(chassis, options.quattor).await?);
    }
    if options.down {
        nodes.union(&cluster.down_nodes().await?);
    }
    if options.all_nodes {
        nodes.union(&cluster.all_nodes(options.quattor).await?);
    }
    if options.worker {
        nodes.union(cluster.worker_nodes(options.quattor).await?);
    }
    if options.idle {
        nodes.union(&cluster.idle_nodes().await?);
    }
    if options.offline {
        nodes.union(&cluster.offline_nodes().await?);
    }
    if options.storage {
        warn!("--storage not implemented yet");
    }

    if let Some(spec) = &options.master {
        let ids = selector::master_ids(spec);
        debug!("found master specifier {:?}", ids);
        if !ids.is_empty() {
            let masters = cluster.masters().await?;
            for id in ids {
                match masters.get_node(&id) {
                    Ok(master) => nodes.add(master),
                    Err(e) => warn!("could not add master node {}: {}", id, e),
                }
            }
        }
    }

    if let Some(spec) = &options.node {
        debug!("found --node option: {}", spec);
        let ids = selector::parse_specifier(spec)?;
        let selected = selector::resolve(&ids, |id| async move { cluster.node(&id).await }).await;
        nodes.union(&selected);
    }

    Ok(nodes)
}
