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
use std::time::{Duration, Instant};

use misty::command::{Command, LocalCommand, NOT_SUPPORTED};
use misty::config::Config;
use misty::inventory::Location;
use misty::node::{Action, CompositeNode, Management, Node, NodeError, Role};

fn node_with_power(id: &str, chassis: &str, command: &str) -> Node {
    Node::builder(id, "testcluster", Role::Worker, Management::Test)
        .location(Location {
            slot: Some(1),
            chassis: Some(chassis.to_string()),
        })
        .slot(
            Action::PowerOn,
            Command::Local(LocalCommand::new(command, Duration::from_secs(10))),
        )
        .build(&Config::builtin_defaults())
        .unwrap()
}

#[tokio::test]
async fn test_nodes_in_one_enclosure_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = CompositeNode::new();
    for (id, chassis) in [
        ("node001", "chassis1"),
        ("node002", "chassis1"),
        ("node003", "chassis2"),
        ("node004", "chassis2"),
    ] {
        // mkdir fails when another member of the same chassis holds the lock
        let lock = dir.path().join(chassis);
        let command = format!(
            "mkdir {lock} && sleep 1 && rmdir {lock}",
            lock = lock.display()
        );
        set.add(node_with_power(id, chassis, &command));
    }
    set.queue(Action::PowerOn);

    let start = Instant::now();
    let reports = set.run_all(true, true).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(reports.len(), 4);
    assert!(reports.iter().all(|r| !r.has_errors()), "{reports:?}");
    assert!(elapsed >= Duration::from_millis(1900));
    assert!(elapsed < Duration::from_millis(3500));
}

#[tokio::test]
async fn test_ungrouped_run_is_parallel() {
    let mut set = CompositeNode::new();
    for id in ["node001", "node002", "node003"] {
        set.add(node_with_power(id, "chassis1", "sleep 1"));
    }
    set.queue(Action::PowerOn);

    let start = Instant::now();
    set.run_all(true, false).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(2500));
}

#[tokio::test]
async fn test_non_threaded_run_is_sequential() {
    let mut set = CompositeNode::new();
    for id in ["node001", "node002", "node003"] {
        set.add(node_with_power(id, "chassis1", "sleep 0.4"));
    }
    set.queue(Action::PowerOn);

    let start = Instant::now();
    let reports = set.run_all(false, false).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(1100));
    assert_eq!(reports.len(), 3);
}

#[tokio::test]
async fn test_unbound_action_reports_not_supported() {
    let storage = Node::builder("storage1", "testcluster", Role::Storage, Management::Test)
        .build(&Config::builtin_defaults())
        .unwrap();
    let mut set = CompositeNode::new();
    set.add(storage);
    set.queue(Action::PbsMomStop);

    let reports = set.run_all(true, false).await.unwrap();
    let outcome = &reports[0].records[0].outcome;
    assert_eq!(outcome.error.as_deref(), Some(NOT_SUPPORTED));
    assert_eq!(outcome.as_text(), Some("pbsmomstop"));
}

#[tokio::test]
async fn test_concurrent_fanout_on_same_set_is_refused() {
    let mut set = CompositeNode::new();
    set.add(node_with_power("node001", "chassis1", "sleep 1"));
    set.queue(Action::PowerOn);
    let set = Arc::new(set);

    let running = {
        let set = Arc::clone(&set);
        tokio::spawn(async move { set.run_all(true, false).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(
        set.run_all(true, false).await,
        Err(NodeError::FanoutInProgress)
    ));
    assert!(running.await.unwrap().is_ok());
    assert!(set.run_all(true, false).await.is_ok());
}
