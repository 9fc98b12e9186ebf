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

mod common;

use misty::command::{Command, LocalCommand};
use misty::manager::{Manager, Options, RunOutcome};
use misty::node::Action;
use std::time::Duration;

use common::{cluster, inventory, CountingProbe};

fn options() -> Options {
    Options {
        cluster: Some(common::CLUSTER.to_string()),
        ..Options::default()
    }
}

async fn manager(dir: &tempfile::TempDir, options: Options) -> Manager {
    let cluster = cluster(dir.path(), CountingProbe::answering("master1"));
    Manager::with_cluster(cluster, options).await.unwrap()
}

#[tokio::test]
async fn test_node_specifier_selects_range() {
    let dir = inventory();
    let manager = manager(
        &dir,
        Options {
            node: Some("node601,605-608".to_string()),
            ..options()
        },
    )
    .await;

    assert_eq!(
        manager.nodes().ids(),
        vec!["node601", "node605", "node606", "node607", "node608"]
    );
    assert!(!manager.has_specials());
}

#[tokio::test]
async fn test_reversed_range_is_rejected() {
    let dir = inventory();
    let cluster = cluster(dir.path(), CountingProbe::answering("master1"));
    let result = Manager::with_cluster(
        cluster,
        Options {
            node: Some("608-605".to_string()),
            ..options()
        },
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_special_nodes_need_force() {
    let dir = inventory();
    let mut manager = manager(
        &dir,
        Options {
            master: Some("master2".to_string()),
            ledon: true,
            ..options()
        },
    )
    .await;
    assert!(manager.has_specials());

    match manager.doit().await.unwrap() {
        RunOutcome::Refused(reason) => assert!(reason.contains("--forced")),
        other => panic!("expected a refusal, got {other:?}"),
    }
}

#[tokio::test]
async fn test_forced_special_dry_run() {
    let dir = inventory();
    let mut manager = manager(
        &dir,
        Options {
            master: Some("master2".to_string()),
            forced: true,
            test_run: true,
            ledon: true,
            ..options()
        },
    )
    .await;

    let RunOutcome::DryRun(commands) = manager.doit().await.unwrap() else {
        panic!("expected a dry run");
    };
    assert!(commands.contains(
        &"master2:[going to run on localhost: ledon on master2.testcluster]".to_string()
    ));
    // the elected master is always part of the run
    assert!(manager.nodes().contains("master1"));
}

#[tokio::test]
async fn test_scheduler_restart_needs_force() {
    let dir = inventory();
    let mut manager = manager(
        &dir,
        Options {
            node: Some("node601".to_string()),
            restart: true,
            test_run: true,
            ..options()
        },
    )
    .await;

    assert!(matches!(
        manager.doit().await.unwrap(),
        RunOutcome::Refused(_)
    ));
}

#[tokio::test]
async fn test_reboot_dry_run_schedules_default_downtime() {
    let dir = inventory();
    let mut manager = manager(
        &dir,
        Options {
            node: Some("601".to_string()),
            reboot: true,
            pause: true,
            test_run: true,
            ..options()
        },
    )
    .await;

    let RunOutcome::DryRun(commands) = manager.doit().await.unwrap() else {
        panic!("expected a dry run");
    };
    assert_eq!(
        commands[0],
        "master1:[going to run on localhost: pause on master1.testcluster]"
    );
    assert_eq!(
        commands[1],
        "node601:[going to run on localhost: softreboot on node601.testcluster]"
    );
    let downtime = &commands[2];
    assert!(downtime.starts_with("going to run on icinga.example.org: "));
    assert!(downtime.contains("SCHEDULE_HOST_SVC_DOWNTIME;node601.testcluster;"));
    // two hours by default
    assert!(downtime.contains(";1;0;7200;misty;scheduled by misty"));
}

#[tokio::test]
async fn test_actions_are_queued_in_fixed_order() {
    let dir = inventory();
    let mut manager = manager(
        &dir,
        Options {
            node: Some("node602".to_string()),
            pbsmomrestart: true,
            poweron: true,
            ledoff: true,
            runcmd: Some("uptime".to_string()),
            test_run: true,
            ..options()
        },
    )
    .await;

    let RunOutcome::DryRun(commands) = manager.doit().await.unwrap() else {
        panic!("expected a dry run");
    };
    assert_eq!(
        commands[1],
        "node602:[going to run on localhost: ledoff on node602.testcluster, \
going to run on localhost: uptime on node602.testcluster, \
going to run on localhost: poweron on node602.testcluster, \
going to run on localhost: pbsmomrestart on node602.testcluster]"
    );
}

#[tokio::test]
async fn test_completed_run_reports_every_node() {
    let dir = inventory();
    let mut manager = manager(
        &dir,
        Options {
            node: Some("node601,node602".to_string()),
            runcmd: Some("hostname".to_string()),
            non_threaded: true,
            ..options()
        },
    )
    .await;

    let RunOutcome::Completed(reports) = manager.doit().await.unwrap() else {
        panic!("expected a completed run");
    };
    let targets: Vec<&str> = reports.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(targets, vec!["master1", "node601", "node602", "Icinga"]);

    let node601 = &reports[1];
    assert_eq!(node601.records.len(), 1);
    assert_eq!(
        node601.records[0].outcome.as_text(),
        Some("running testcommand: hostname on node601.testcluster")
    );
    assert!(reports.iter().all(|r| !r.has_errors()));
}

#[tokio::test]
async fn test_state_builds_status_table() {
    let dir = inventory();
    let manager = manager(
        &dir,
        Options {
            node: Some("node603".to_string()),
            state: true,
            ..options()
        },
    )
    .await;

    let table = manager.status_report().unwrap();
    assert!(table.contains("Nodes - Chassis interface - Location"));
    assert!(table
        .lines()
        .any(|line| line.starts_with("node603 chassis1.testcluster")));
}

#[tokio::test]
async fn test_hardreboot_with_master_runs_nothing() {
    let dir = inventory();
    let marker = dir.path().join("rebooted");
    let cluster = cluster(dir.path(), CountingProbe::answering("master1")).with_slot(
        Action::HardReboot,
        Command::Local(LocalCommand::new(
            format!("touch {}", marker.display()),
            Duration::from_secs(5),
        )),
    );
    let mut manager = Manager::with_cluster(
        cluster,
        Options {
            master: Some("master1".to_string()),
            node: Some("node601".to_string()),
            hardreboot: true,
            ..options()
        },
    )
    .await
    .unwrap();
    assert!(manager.has_specials());

    match manager.doit().await.unwrap() {
        RunOutcome::Refused(reason) => assert!(reason.contains("--forced")),
        other => panic!("expected a refusal, got {other:?}"),
    }
    assert!(!marker.exists());
}
