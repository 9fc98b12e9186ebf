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

//! Commands: one operation against one target plus the strategy to run it.
//!
//! A [`Command`] is immutable once built. Running it never fails in the Rust
//! sense: connection problems, non-zero exits and timeouts all end up in the
//! error half of the returned [`Outcome`].

mod local;
mod outcome;
mod parse;
mod probe;
mod ssh;
mod telnet;

pub use local::LocalCommand;
pub use outcome::{Outcome, Output};
pub use parse::{parse_pbs_nodes, Parse};
pub use probe::TcpPing;
pub use ssh::{SshCommand, DEFAULT_SSH_PORT};
pub use telnet::{TelnetCommand, DEFAULT_SHELL_PROMPT, DEFAULT_TELNET_PORT};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;

pub const NOT_SUPPORTED: &str = "Not supported yet";

/// Anything that can report the batch scheduler's view of a node.
///
/// Implemented by master nodes; worker status commands hold one so they can
/// ask their master without owning it.
#[async_trait]
pub trait SchedulerStateSource: Send + Sync + fmt::Debug {
    async fn scheduler_state_for(&self, node_id: &str) -> Outcome;
}

#[derive(Debug, Clone)]
pub enum Command {
    Local(LocalCommand),
    Ssh(SshCommand),
    Telnet(TelnetCommand),
    /// Members run one after another; the outcome is [`Output::Many`].
    Composite(Vec<Command>),
    TcpPing(TcpPing),
    PbsNodeState {
        node_id: String,
        source: Arc<dyn SchedulerStateSource>,
    },
    /// Echoes its text back without touching anything.
    Test(String),
    /// Placeholder for an action the node's hardware cannot perform.
    NotSupported(String),
    Parsed(Box<Command>, Parse),
}

impl Command {
    pub fn parsed(self, parse: Parse) -> Self {
        Command::Parsed(Box::new(self), parse)
    }

    /// Target host, or `localhost` for commands that do not leave this host.
    pub fn host(&self) -> &str {
        match self {
            Command::Ssh(c) => &c.host,
            Command::Telnet(c) => &c.host,
            Command::TcpPing(c) => &c.host,
            Command::Parsed(inner, _) => inner.host(),
            Command::PbsNodeState { node_id, .. } => node_id,
            Command::Local(_) | Command::Composite(_) | Command::Test(_) | Command::NotSupported(_) => {
                "localhost"
            }
        }
    }

    /// What would be run.
    pub fn describe(&self) -> String {
        match self {
            Command::Local(c) => c.describe(),
            Command::Ssh(c) => c.describe(),
            Command::Telnet(c) => c.describe(),
            Command::TcpPing(c) => c.describe(),
            Command::Composite(members) => {
                let described: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                format!("[{}]", described.join(", "))
            }
            Command::PbsNodeState { node_id, .. } => format!("PBSNodeStateCommand on {node_id}"),
            Command::Test(text) | Command::NotSupported(text) => text.clone(),
            Command::Parsed(inner, _) => inner.describe(),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Command::NotSupported(_))
    }

    pub fn run(&self) -> BoxFuture<'_, Outcome> {
        async move {
            match self {
                Command::Local(c) => c.run().await,
                Command::Ssh(c) => c.run().await,
                Command::Telnet(c) => c.run().await,
                Command::TcpPing(c) => c.run().await,
                Command::Composite(members) => {
                    let mut outcomes = Vec::with_capacity(members.len());
                    for member in members {
                        outcomes.push(member.run().await);
                    }
                    Outcome::ok(Output::Many(outcomes))
                }
                Command::PbsNodeState { node_id, source } => {
                    source.scheduler_state_for(node_id).await
                }
                Command::Test(text) => {
                    tracing::info!("testcommand: {}", text);
                    Outcome::text(format!("running testcommand: {text}"))
                }
                Command::NotSupported(request) => {
                    tracing::warn!("command not supported (yet) {}", request);
                    Outcome::failed(Output::Text(request.clone()), NOT_SUPPORTED)
                }
                Command::Parsed(inner, parse) => parse.apply(inner.run().await),
            }
        }
        .boxed()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "going to run on {}: {}", self.host(), self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct FixedStates;

    #[async_trait]
    impl SchedulerStateSource for FixedStates {
        async fn scheduler_state_for(&self, node_id: &str) -> Outcome {
            Outcome::text(format!("{node_id}: free"))
        }
    }

    #[tokio::test]
    async fn test_not_supported_echoes_request() {
        let outcome = Command::NotSupported("ledon".into()).run().await;
        assert_eq!(outcome.output, Output::Text("ledon".into()));
        assert_eq!(outcome.error.as_deref(), Some(NOT_SUPPORTED));
    }

    #[tokio::test]
    async fn test_composite_runs_members_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order");
        let step = |n: u32| {
            Command::Local(LocalCommand::new(
                format!("echo {n} >> {}", log.display()),
                Duration::from_secs(5),
            ))
        };
        let composite = Command::Composite(vec![step(1), step(2), Command::Test("three".into())]);

        let outcome = composite.run().await;
        let Output::Many(children) = outcome.output else {
            panic!("composite did not return a list");
        };
        assert_eq!(children.len(), 3);
        assert_eq!(
            children[2].as_text(),
            Some("running testcommand: three")
        );
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "1\n2\n");
    }

    #[tokio::test]
    async fn test_pbs_node_state_asks_source() {
        let command = Command::PbsNodeState {
            node_id: "node2201".into(),
            source: Arc::new(FixedStates),
        };
        assert_eq!(command.describe(), "PBSNodeStateCommand on node2201");
        assert_eq!(command.run().await, Outcome::text("node2201: free"));
    }

    #[test]
    fn test_display_names_host() {
        let command = Command::Ssh(SshCommand::new(
            "service pbs_mom status",
            "node2201.shuppet",
            "root",
            Duration::from_secs(1),
        ));
        assert_eq!(
            command.to_string(),
            "going to run on node2201.shuppet: SshCommand: root@node2201.shuppet:22 command: service pbs_mom status"
        );
        let composite = Command::Composite(vec![Command::Test("a".into())]);
        assert_eq!(composite.describe(), "[going to run on localhost: a]");
    }
}
