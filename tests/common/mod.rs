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

//! Shared fixtures: an on-disk inventory and a configuration for the
//! `testcluster` cluster whose nodes only run test commands.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use misty::cluster::{Cluster, MasterProbe};
use misty::command::{Outcome, Output};
use misty::config::{ClusterProfileConfig, Config};
use misty::node::Node;

pub const CLUSTER: &str = "testcluster";

/// Write one profile per id; workers 601-604 sit in chassis 1, the rest in
/// chassis 2.
pub fn write_inventory(dir: &Path, ids: &[&str]) {
    for id in ids {
        let chassis = match id.trim_start_matches("node").parse::<u32>() {
            Ok(n) if n <= 604 => 1,
            _ => 2,
        };
        let profile = format!(
            r#"{{"hardware": {{"location": "chassis{chassis}-slot{}"}}}}"#,
            id.len()
        );
        std::fs::write(dir.join(format!("{id}.{CLUSTER}.json")), profile).unwrap();
    }
}

pub fn inventory() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut ids = vec!["master1", "master2"];
    let workers: Vec<String> = (601..=610).map(|n| format!("node{n}")).collect();
    ids.extend(workers.iter().map(String::as_str));
    write_inventory(dir.path(), &ids);
    dir
}

pub fn config(inventory: &Path) -> Arc<Config> {
    let mut config = Config::builtin_defaults();
    config.merge(Config::from_pairs([
        ("quattor_path", inventory.to_string_lossy().to_string()),
        ("quattor_files_tpl", "{nodeid}.{clustername}.json".to_string()),
        ("quattor_nodeid_regex", r"(?P<id>node\d+)".to_string()),
        ("quattor_masterid_regex", r"(?P<id>master\d+)".to_string()),
        ("quattor_storageid_regex", r"(?P<id>storage\d+)".to_string()),
        ("location_json", "hardware, location".to_string()),
        (
            "quattor_location_string_regex",
            r"^chassis(?P<chassis>\d+)-slot(?P<slot>\d+)$".to_string(),
        ),
        ("chasisname_tpl", "chassis{chassisname}.{clustername}".to_string()),
        ("icinga_host", "icinga.example.org".to_string()),
        ("icinga_socket", "/var/lib/icinga/rw/icinga.cmd".to_string()),
        (
            "icinga_acknowledge_host_problem",
            "[{timestamp}] ACKNOWLEDGE_HOST_PROBLEM;{host_name};1;1;1;misty;{comment}".to_string(),
        ),
        (
            "icinga_acknowledge_service_problem",
            "[{timestamp}] ACKNOWLEDGE_SVC_PROBLEM;{host_name};{service};1;1;1;misty;{comment}"
                .to_string(),
        ),
        (
            "icinga_schedule_service_downtime",
            "[{timestamp}] SCHEDULE_HOST_SVC_DOWNTIME;{host_name};{start_time};{end_time};1;0;{duration};misty;{comment}"
                .to_string(),
        ),
    ]));
    config.set_cluster(
        CLUSTER,
        ClusterProfileConfig {
            worker: Some("test".to_string()),
            master: Some("test".to_string()),
            storage: Some("test".to_string()),
            group_by_chassis: Some(false),
        },
    );
    Arc::new(config)
}

/// Master probe that only accepts one candidate and counts its calls.
#[derive(Debug, Default)]
pub struct CountingProbe {
    pub answering: Option<String>,
    pub calls: AtomicUsize,
}

impl CountingProbe {
    pub fn answering(id: &str) -> Arc<Self> {
        Arc::new(Self {
            answering: Some(id.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MasterProbe for CountingProbe {
    async fn probe(&self, candidate: &Node) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.answering.as_deref() == Some(candidate.id()) {
            Outcome::text("pbsnodes")
        } else {
            Outcome::failed(Output::None, "connection refused")
        }
    }
}

pub fn cluster(inventory: &Path, probe: Arc<dyn MasterProbe>) -> Cluster {
    Cluster::get(CLUSTER, config(inventory)).unwrap().with_probe(probe)
}
