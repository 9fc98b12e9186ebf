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

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use crate::manager::Options;

#[derive(Parser, Debug, Default)]
#[command(
    name = "misty",
    version,
    about = "Manage the nodes of an HPC cluster",
    long_about = "misty selects nodes of a cluster and runs power, scheduler and monitoring actions on them.\nNodes are reached over SSH, telnet or local management tools, depending on the hardware.",
    after_help = "EXAMPLES:\n  Show the state of some nodes:   misty -C raichu -s -n node601,605-608\n  Power cycle down nodes:         misty -C raichu --down --hardreboot --downtime 4h\n  Take nodes out of the queue:    misty -C golett --setoffline -n 2201-2210\n  See what would run:             misty -C shuppet --chassis 3 --poweroff -t"
)]
#[command(group(
    ArgGroup::new("power")
        .args(["hardreboot", "poweron", "poweroff"])
        .multiple(false)
))]
pub struct Cli {
    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    #[arg(
        long,
        help = "Extra configuration file, read after the standard locations"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        help = "Allow actions on special nodes and scheduler restarts"
    )]
    pub forced: bool,

    #[arg(
        short = 't',
        long,
        help = "Print the commands that would run without running them"
    )]
    pub test_run: bool,

    #[arg(long, help = "Run nodes one after another")]
    pub non_threaded: bool,

    #[arg(
        short = 'C',
        long,
        help = "Cluster to work on [default: guessed from the hostname]"
    )]
    pub cluster: Option<String>,

    // selection
    #[arg(short = 'i', long, help = "Select all idle nodes")]
    pub idle: bool,

    #[arg(short = 'a', long, help = "Select all worker nodes")]
    pub worker: bool,

    #[arg(long, help = "Select nodes the scheduler reports as down")]
    pub down: bool,

    #[arg(short = 'o', long, help = "Select nodes the scheduler reports as offline")]
    pub offline: bool,

    #[arg(
        short = 'n',
        long,
        value_name = "NODES",
        help = "Nodes to select, e.g. node601,605-608"
    )]
    pub node: Option<String>,

    #[arg(long, value_name = "MASTERS", help = "Masters to select, e.g. master1,master3")]
    pub master: Option<String>,

    #[arg(long, help = "Select storage nodes")]
    pub storage: bool,

    #[arg(long, value_name = "CHASSIS", help = "Select every node in a chassis")]
    pub chassis: Option<String>,

    #[arg(
        short = 'q',
        long,
        help = "Take the node list from the quattor inventory instead of the scheduler"
    )]
    pub quattor: bool,

    #[arg(long, help = "Select workers and masters")]
    pub all_nodes: bool,

    // node actions
    #[arg(short = 's', long, help = "Show the state of the selected nodes")]
    pub state: bool,

    #[arg(long, help = "Mark the selected nodes offline in the scheduler")]
    pub setoffline: bool,

    #[arg(long, help = "Mark the selected nodes online in the scheduler")]
    pub setonline: bool,

    #[arg(long, help = "Run the pbs_mom cleanup script")]
    pub pbsmomcleanup: bool,

    #[arg(long, help = "Stop pbs_mom")]
    pub pbsmomstop: bool,

    #[arg(long, value_name = "COMMAND", help = "Run a shell command on the selected nodes")]
    pub runcmd: Option<String>,

    #[arg(long, help = "Query pbs_mom status")]
    pub pbsmomstatus: bool,

    #[arg(long, help = "Soft power off")]
    pub poweroff: bool,

    #[arg(long, help = "Cut power without shutting down")]
    pub powercut: bool,

    #[arg(long, help = "Power on")]
    pub poweron: bool,

    #[arg(long, help = "Soft reboot")]
    pub reboot: bool,

    #[arg(long, help = "Hard reboot through the management controller")]
    pub hardreboot: bool,

    #[arg(long, help = "Restart pbs_mom")]
    pub pbsmomrestart: bool,

    #[arg(long, help = "Turn the locator LED on")]
    pub ledon: bool,

    #[arg(long, help = "Turn the locator LED off")]
    pub ledoff: bool,

    #[arg(long = "fix-downonerror", help = "Clear the health check error on down nodes")]
    pub fix_downonerror: bool,

    #[arg(
        long,
        value_name = "COMPONENTS",
        help = "Run ncm-ncd for the given comma separated components"
    )]
    pub co: Option<String>,

    // cluster actions
    #[arg(short = 'p', long, help = "Pause the scheduler")]
    pub pause: bool,

    #[arg(short = 'r', long, help = "Resume the scheduler")]
    pub resume: bool,

    #[arg(long, help = "Restart the scheduler (needs --forced)")]
    pub restart: bool,

    // monitoring
    #[arg(long, help = "Acknowledge host problems in monitoring")]
    pub ack: bool,

    #[arg(long, value_name = "SERVICE", help = "Acknowledge a service problem in monitoring")]
    pub ack_service: Option<String>,

    #[arg(long, value_name = "HOURS", help = "Schedule monitoring downtime, e.g. 4h")]
    pub downtime: Option<String>,

    #[arg(long, help = "Comment attached to acknowledgements and downtimes")]
    pub comment: Option<String>,

    #[arg(long, help = "Include management controllers in monitoring actions")]
    pub imms: bool,
}

impl Cli {
    pub fn options(&self) -> Options {
        Options {
            forced: self.forced,
            test_run: self.test_run,
            non_threaded: self.non_threaded,
            cluster: self.cluster.clone(),

            idle: self.idle,
            worker: self.worker,
            down: self.down,
            offline: self.offline,
            node: self.node.clone(),
            master: self.master.clone(),
            storage: self.storage,
            chassis: self.chassis.clone(),
            quattor: self.quattor,
            all_nodes: self.all_nodes,

            state: self.state,
            setoffline: self.setoffline,
            setonline: self.setonline,
            pbsmomcleanup: self.pbsmomcleanup,
            pbsmomstop: self.pbsmomstop,
            runcmd: self.runcmd.clone(),
            pbsmomstatus: self.pbsmomstatus,
            poweroff: self.poweroff,
            powercut: self.powercut,
            poweron: self.poweron,
            reboot: self.reboot,
            hardreboot: self.hardreboot,
            pbsmomrestart: self.pbsmomrestart,
            ledon: self.ledon,
            ledoff: self.ledoff,
            fix_downonerror: self.fix_downonerror,
            co: self.co.clone(),

            pause: self.pause,
            resume: self.resume,
            restart: self.restart,

            ack: self.ack,
            ack_service: self.ack_service.clone(),
            downtime: self.downtime.clone(),
            comment: self.comment.clone(),
            imms: self.imms,
        }
    }
}
