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

//! Icinga integration: acknowledgements and downtimes for selected nodes.
//!
//! Every operation renders one external command line per target from a
//! configured template, writes them all to the Icinga command socket in a
//! single `sudo sh -c` and queues that as one SSH command to the Icinga host.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::command::{Command, SshCommand};
use crate::config::{Config, ConfigError};
use crate::node::{CommandRecord, Node, NodeReport};

const ICINGA_TIMEOUT: Duration = Duration::from_secs(6);

/// Report tag of monitoring commands.
pub const MONITORING_TARGET: &str = "Icinga";

#[derive(Debug)]
pub struct Icinga {
    config: Arc<Config>,
    targets: Vec<Arc<Node>>,
    include_imms: bool,
    queue: Mutex<Vec<Command>>,
}

impl Icinga {
    /// `include_imms` repeats every operation for the management
    /// controller of each target that has a monitoring alias.
    pub fn new(config: Arc<Config>, targets: Vec<Arc<Node>>, include_imms: bool) -> Self {
        Self {
            config,
            targets,
            include_imms,
            queue: Mutex::new(Vec::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Command>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn comment(&self, comment: Option<&str>) -> Result<String, ConfigError> {
        match comment {
            Some(comment) if !comment.is_empty() => Ok(comment.to_string()),
            _ => self.config.get("icinga_default_comment"),
        }
    }

    /// Acknowledge the current host problem of every target.
    pub fn acknowledge_host(&self, comment: Option<&str>) -> Result<(), ConfigError> {
        let comment = self.comment(comment)?;
        let timestamp = (chrono::Utc::now().timestamp() - 1).to_string();
        let mut lines = Vec::new();

        for node in &self.targets {
            let base = [
                ("host_name", node.hostname()),
                ("timestamp", timestamp.as_str()),
                ("comment", comment.as_str()),
                ("clustername", node.cluster()),
            ];
            let host_name = self.config.render("icinga_hostname", &base)?;
            let mut params = base;
            params[0].1 = host_name.as_str();
            lines.push(self.config.render("icinga_acknowledge_host_problem", &params)?);

            if let Some(alias) = self.imm_alias(node) {
                params[0].1 = alias;
                lines.push(self.config.render("icinga_acknowledge_host_problem", &params)?);
            }
        }
        self.submit(lines)
    }

    /// Acknowledge the problem of `service` on every target.
    pub fn acknowledge_service(
        &self,
        service: &str,
        comment: Option<&str>,
    ) -> Result<(), ConfigError> {
        let comment = self.comment(comment)?;
        let timestamp = (chrono::Utc::now().timestamp() - 1).to_string();
        let mut lines = Vec::new();

        for node in &self.targets {
            let base = [
                ("host_name", node.hostname()),
                ("timestamp", timestamp.as_str()),
                ("comment", comment.as_str()),
                ("clustername", node.cluster()),
                ("service", service),
            ];
            let host_name = self.config.render("icinga_hostname", &base)?;
            let mut params = base;
            params[0].1 = host_name.as_str();
            lines.push(self.config.render("icinga_acknowledge_service_problem", &params)?);

            if let Some(alias) = self.imm_alias(node) {
                params[0].1 = alias;
                lines.push(self.config.render("icinga_acknowledge_service_problem", &params)?);
            }
        }
        self.submit(lines)
    }

    /// Schedule a downtime of `hours` for every target and its services,
    /// starting now.
    pub fn schedule_downtime(&self, hours: f64, comment: Option<&str>) -> Result<(), ConfigError> {
        let comment = self.comment(comment)?;
        let start = chrono::Utc::now().timestamp();
        let duration = (hours * 3600.0).round() as i64;

        let start_time = start.to_string();
        let timestamp = (start - 1).to_string();
        let end_time = (start + duration).to_string();
        let duration = duration.to_string();
        let mut lines = Vec::new();

        for node in &self.targets {
            let mut params = [
                ("host_name", node.hostname()),
                ("start_time", start_time.as_str()),
                ("timestamp", timestamp.as_str()),
                ("comment", comment.as_str()),
                ("end_time", end_time.as_str()),
                ("duration", duration.as_str()),
                ("clustername", node.cluster()),
            ];
            lines.push(self.config.render("icinga_schedule_service_downtime", &params)?);

            if let Some(alias) = self.imm_alias(node) {
                params[0].1 = alias;
                lines.push(self.config.render("icinga_schedule_service_downtime", &params)?);
            }
        }
        self.submit(lines)
    }

    fn imm_alias<'a>(&self, node: &'a Node) -> Option<&'a str> {
        if self.include_imms {
            node.monitoring_alias()
        } else {
            None
        }
    }

    fn submit(&self, lines: Vec<String>) -> Result<(), ConfigError> {
        if lines.is_empty() {
            debug!("no monitoring targets, nothing to send");
            return Ok(());
        }

        let socket = self.config.get("icinga_socket")?;
        let writes: Vec<String> = lines
            .iter()
            .map(|line| format!("echo \"{line}\" > {socket}"))
            .collect();
        let command = format!("sudo sh -c '{}'", writes.join(";"));
        debug!("creating command {}", command);

        let ssh = SshCommand::new(
            command,
            self.config.get("icinga_host")?,
            self.config.get_or("ssh_user", "root"),
            ICINGA_TIMEOUT,
        )
        .with_connect_timeout(self.config.get_secs("ssh_connect_timeout")?);
        self.pending().push(Command::Ssh(ssh));
        Ok(())
    }

    pub fn show_commands(&self) -> Vec<String> {
        self.pending().iter().map(|c| c.to_string()).collect()
    }

    /// Run the queued commands in order, tagged as [`MONITORING_TARGET`].
    pub async fn run_all(&self) -> NodeReport {
        let commands: Vec<Command> = self.pending().clone();
        let mut records = Vec::with_capacity(commands.len());
        for command in commands {
            let outcome = command.run().await;
            records.push(CommandRecord { command, outcome });
        }
        NodeReport::new(MONITORING_TARGET, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Management, Role};

    fn config() -> Arc<Config> {
        let mut config = Config::builtin_defaults();
        config.merge(Config::from_pairs([
            ("icinga_host", "icinga.example.org"),
            ("icinga_socket", "/var/lib/icinga/rw/icinga.cmd"),
            (
                "icinga_acknowledge_host_problem",
                "[{timestamp}] ACKNOWLEDGE_HOST_PROBLEM;{host_name};1;1;1;misty;{comment}",
            ),
            (
                "icinga_acknowledge_service_problem",
                "[{timestamp}] ACKNOWLEDGE_SVC_PROBLEM;{host_name};{service};1;1;1;misty;{comment}",
            ),
            (
                "icinga_schedule_service_downtime",
                "[{timestamp}] SCHEDULE_HOST_SVC_DOWNTIME;{host_name};{start_time};{end_time};1;0;{duration};misty;{comment}",
            ),
        ]));
        Arc::new(config)
    }

    fn targets(config: &Config) -> Vec<Arc<Node>> {
        ["node001", "node002"]
            .iter()
            .map(|id| {
                Arc::new(
                    Node::builder(*id, "testcluster", Role::Worker, Management::Test)
                        .build(config)
                        .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_acknowledge_host_builds_one_command() {
        let config = config();
        let icinga = Icinga::new(Arc::clone(&config), targets(&config), false);
        icinga.acknowledge_host(None).unwrap();

        let commands = icinga.show_commands();
        assert_eq!(commands.len(), 1);
        let command = &commands[0];
        assert!(command.starts_with("going to run on icinga.example.org: "));
        assert!(command.contains("command: sudo sh -c 'echo \"["));
        assert!(command.contains(
            "ACKNOWLEDGE_HOST_PROBLEM;node001.testcluster;1;1;1;misty;scheduled by misty\" > /var/lib/icinga/rw/icinga.cmd;echo"
        ));
        assert!(command.contains("node002.testcluster"));
    }

    #[test]
    fn test_downtime_duration() {
        let config = config();
        let icinga = Icinga::new(Arc::clone(&config), targets(&config), true);
        icinga.schedule_downtime(1.5, Some("maintenance")).unwrap();

        let command = &icinga.show_commands()[0];
        assert!(command.contains(";1;0;5400;misty;maintenance"));
    }

    #[test]
    fn test_service_ack_uses_service_name() {
        let config = config();
        let icinga = Icinga::new(Arc::clone(&config), targets(&config), false);
        icinga.acknowledge_service("pbs_mom", Some("known")).unwrap();
        assert!(icinga.show_commands()[0].contains(";pbs_mom;1;1;1;misty;known"));
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let config = Arc::new(Config::builtin_defaults());
        let icinga = Icinga::new(Arc::clone(&config), targets(&config), false);
        assert!(matches!(
            icinga.acknowledge_host(None),
            Err(ConfigError::MissingKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_targets_runs_nothing() {
        let icinga = Icinga::new(config(), Vec::new(), false);
        icinga.schedule_downtime(2.0, None).unwrap();
        let report = icinga.run_all().await;
        assert_eq!(report.target, MONITORING_TARGET);
        assert!(report.records.is_empty());
    }
}
