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

//! Slot assembly: one role profile combined with one management profile.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{
    Command, LocalCommand, Parse, SchedulerStateSource, SshCommand, TcpPing, TelnetCommand,
};
use crate::config::Config;
use crate::inventory::Location;
use crate::ssh::ServerCheckMethod;

use super::action::Action;
use super::error::NodeError;
use super::Node;

pub(crate) const PBSNODES_COMMAND: &str = r"sudo pbsnodes | grep -v 'status\|jobs'";
const DMTF_LED_TIMEOUT: Duration = Duration::from_secs(30);
const DMTF_LED_USER: &str = "USERID";

/// What a node is for in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Worker,
    Master,
    Storage,
}

impl Role {
    /// Masters and storage nodes need an explicit force to be touched.
    pub fn is_special(self) -> bool {
        !matches!(self, Role::Worker)
    }
}

/// How the node's hardware is managed out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Management {
    /// IBM IMM reached over telnet.
    Imm,
    /// Blade in a chassis whose management module is reached over SSH.
    Blade,
    /// Dell DRAC driven through the local `idracadm` tool.
    Drac,
    /// BMC driven through the local `ipmitool`.
    Ipmi,
    /// Ipmi plus LED control through the DMTF SMASH CLP.
    DmtfIpmi,
    /// Every slot echoes what it would do.
    Test,
    /// No out of band management at all.
    Unmanaged,
}

impl Management {
    pub fn name(self) -> &'static str {
        match self {
            Management::Imm => "imm",
            Management::Blade => "blade",
            Management::Drac => "drac",
            Management::Ipmi => "ipmi",
            Management::DmtfIpmi => "dmtf-ipmi",
            Management::Test => "test",
            Management::Unmanaged => "none",
        }
    }
}

impl fmt::Display for Management {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Management {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "imm" => Ok(Management::Imm),
            "blade" => Ok(Management::Blade),
            "drac" => Ok(Management::Drac),
            "ipmi" => Ok(Management::Ipmi),
            "dmtf-ipmi" | "dmtfipmi" | "dmtf" => Ok(Management::DmtfIpmi),
            "test" => Ok(Management::Test),
            "none" | "unmanaged" => Ok(Management::Unmanaged),
            _ => Err(NodeError::UnknownManagement {
                name: s.to_string(),
            }),
        }
    }
}

/// How ad hoc commands reach the node.
#[derive(Debug, Clone)]
pub(crate) enum Shell {
    Ssh(SshCommand),
    Test { node: String },
}

impl Shell {
    pub(crate) fn command(&self, command: &str) -> Command {
        match self {
            Shell::Ssh(template) => {
                let mut ssh = template.clone();
                ssh.command = command.to_string();
                Command::Ssh(ssh)
            }
            Shell::Test { node } => Command::Test(format!("{command} on {node}")),
        }
    }
}

/// Scheduler access held by master nodes.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerCommands {
    /// Full `pbsnodes` listing with the regular timeout.
    pub list: Command,
    /// Same listing with the fast timeout, used to elect a master.
    pub probe: Command,
}

pub(crate) struct Assembly {
    pub slots: BTreeMap<Action, Command>,
    pub status: Command,
    pub shell: Shell,
    pub admin_host: String,
    pub monitoring_alias: Option<String>,
    pub scheduler: Option<SchedulerCommands>,
}

struct Timeouts {
    command: Duration,
    fast: Duration,
    connect: Duration,
}

/// Inputs needed to assemble the slots of one node.
pub(crate) struct Blueprint<'a> {
    pub config: &'a Config,
    pub id: &'a str,
    pub cluster: &'a str,
    pub role: Role,
    pub management: Management,
    pub hostname: &'a str,
    pub master: Option<&'a Arc<Node>>,
    pub location: Option<&'a Location>,
}

impl Blueprint<'_> {
    pub(crate) fn assemble(&self) -> Result<Assembly, NodeError> {
        let timeouts = Timeouts {
            command: self.config.get_secs("command_timeout")?,
            fast: self.config.get_secs("command_fast_timeout")?,
            connect: self.config.get_secs("ssh_connect_timeout")?,
        };

        if self.management == Management::Test {
            return Ok(self.assemble_test());
        }

        let shell = self.ssh_template(self.hostname, &timeouts);
        let ssh = |command: &str, timeout: Duration| {
            let mut template = self.ssh_template(self.hostname, &timeouts);
            template.command = command.to_string();
            template.timeout = timeout;
            Command::Ssh(template)
        };

        let mut slots = BTreeMap::new();
        slots.insert(Action::SoftPowerOff, ssh("poweroff", timeouts.command));
        slots.insert(Action::SoftReboot, ssh("reboot", timeouts.command));

        let mut status = vec![
            Command::TcpPing(TcpPing::new(self.hostname, timeouts.fast)),
            ssh("uname", timeouts.fast).parsed(Parse::SshAlive),
        ];
        let mut scheduler = None;

        match self.role {
            Role::Worker => {
                for (action, verb) in [
                    (Action::PbsMomStatus, "status"),
                    (Action::PbsMomStop, "stop"),
                    (Action::PbsMomRestart, "restart"),
                ] {
                    slots.insert(
                        action,
                        ssh(&format!("service pbs_mom {verb}"), timeouts.command),
                    );
                }
                slots.insert(
                    Action::FixDownOnError,
                    ssh(
                        "sudo momctl -q clearmsg && sudo /bin/rm -f /var/tmp/healthscript.error",
                        timeouts.command,
                    ),
                );
                if let Some(master) = self.master {
                    slots.insert(
                        Action::PbsMomCleanup,
                        ssh(
                            &format!(
                                "export PBS_HOME=/var/spool/pbs && export PBS_SERVER={} && /var/spool/pbs/scripts/cleanup",
                                master.id()
                            ),
                            timeouts.command,
                        ),
                    );
                    let source: Arc<dyn SchedulerStateSource> = Arc::<Node>::clone(master);
                    status.push(Command::PbsNodeState {
                        node_id: self.id.to_string(),
                        source,
                    });
                }
            }
            Role::Master => {
                for action in [
                    Action::PbsMomStatus,
                    Action::PbsMomStop,
                    Action::PbsMomRestart,
                    Action::PbsMomCleanup,
                ] {
                    slots.insert(action, Command::Test("No pbsmom on the masters!".into()));
                }
                slots.insert(
                    Action::FixDownOnError,
                    Command::Test("fixdownonerror is not run on a master".into()),
                );
                slots.insert(Action::PauseScheduler, ssh("sudo mschedctl -p", timeouts.command));
                slots.insert(Action::ResumeScheduler, ssh("sudo mschedctl -r", timeouts.command));
                slots.insert(Action::RestartScheduler, ssh("sudo mschedctl -R", timeouts.command));
                scheduler = Some(SchedulerCommands {
                    list: ssh(PBSNODES_COMMAND, timeouts.command).parsed(Parse::PbsNodes),
                    probe: ssh(PBSNODES_COMMAND, timeouts.fast).parsed(Parse::PbsNodes),
                });
            }
            Role::Storage => {}
        }

        let (admin_host, monitoring_alias) =
            self.management_slots(&mut slots, &mut status, &timeouts)?;

        Ok(Assembly {
            slots,
            status: Command::Composite(status),
            shell: Shell::Ssh(shell),
            admin_host,
            monitoring_alias,
            scheduler,
        })
    }

    fn ssh_template(&self, host: &str, timeouts: &Timeouts) -> SshCommand {
        let user = self.config.get_or("ssh_user", "root");
        let server_check = ServerCheckMethod::from_config_value(
            &self.config.get_or("ssh_strict_host_key_checking", "no"),
        );
        SshCommand::new("", host, user, timeouts.command)
            .with_connect_timeout(timeouts.connect)
            .with_server_check(server_check)
    }

    fn node_params(&self) -> [(&str, &str); 2] {
        [("nodeid", self.id), ("clustername", self.cluster)]
    }

    fn optional_render(
        &self,
        key: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<String>, NodeError> {
        if self.config.contains(key) {
            Ok(Some(self.config.render(key, params)?))
        } else {
            Ok(None)
        }
    }

    /// Bind the power slots of the management profile and append its power
    /// state to the status command. Returns the admin host and monitoring alias.
    fn management_slots(
        &self,
        slots: &mut BTreeMap<Action, Command>,
        status: &mut Vec<Command>,
        timeouts: &Timeouts,
    ) -> Result<(String, Option<String>), NodeError> {
        match self.management {
            Management::Imm => {
                let admin = self.config.render("imm_tpl", &self.node_params())?;
                let user = self.config.get(&format!("imm_user_{}", self.cluster))?;
                let password = self.config.get("immpasswd")?;
                let telnet = |command: &str| {
                    Command::Telnet(TelnetCommand::new(
                        command,
                        &admin,
                        &user,
                        Some(password.clone()),
                        timeouts.fast,
                    ))
                };
                slots.insert(Action::PowerOn, telnet("power on"));
                slots.insert(Action::PowerCut, telnet("power off"));
                slots.insert(Action::HardReboot, telnet("power cycle"));
                status.push(telnet("power state").parsed(Parse::ImmPowerState));
                let alias = self.optional_render("icinga_idpx_imm_tpl", &self.node_params())?;
                Ok((admin, alias))
            }
            Management::Blade => {
                let (slot, chassis) = match self.location {
                    Some(Location {
                        slot: Some(slot),
                        chassis: Some(chassis),
                    }) => (*slot, chassis.as_str()),
                    _ => {
                        return Err(NodeError::Location {
                            id: self.id.to_string(),
                            reason: "blade nodes need a chassis and slot".to_string(),
                        })
                    }
                };
                let chassis_params = [("chassisname", chassis), ("clustername", self.cluster)];
                let chassis_host = self.config.render("chasis_host_tpl", &chassis_params)?;
                let user = self.config.get("bladeuser")?;
                let password = self.config.get("bladepasswd")?;
                let blade = |command: &str| {
                    let mut ssh = self.ssh_template(&chassis_host, timeouts);
                    ssh.command = format!("{command} -T system:blade[{slot}]");
                    ssh.user = user.clone();
                    Command::Ssh(ssh.with_password(Some(password.clone())))
                };
                slots.insert(Action::SoftPowerOff, blade("power -softoff"));
                slots.insert(Action::PowerCut, blade("power -off"));
                slots.insert(Action::PowerOn, blade("power -on"));
                slots.insert(Action::HardReboot, blade("power -cycle"));
                status.push(blade("power -state").parsed(Parse::BladeState));
                let alias = self.optional_render("icinga_blade_imm_tpl", &chassis_params)?;
                Ok((chassis_host, alias))
            }
            Management::Drac => {
                let admin = self.config.render("imm_tpl", &self.node_params())?;
                let password = self.config.get("dracpasswd")?;
                let drac = |verb: &str| {
                    Command::Local(
                        LocalCommand::new(
                            format!(
                                "idracadm -r {admin} -u root -p '{password}' serveraction {verb}"
                            ),
                            timeouts.command,
                        )
                        .with_secret(password.clone()),
                    )
                };
                slots.insert(Action::PowerOn, drac("powerup"));
                slots.insert(Action::PowerCut, drac("powerdown"));
                slots.insert(Action::HardReboot, drac("hardreset"));
                status.push(drac("powerstatus").parsed(Parse::DracStatus));
                Ok((admin, None))
            }
            Management::Ipmi | Management::DmtfIpmi => {
                let admin = self.config.render("imm_tpl", &self.node_params())?;
                let user = self.config.get(&format!("imm_user_{}", self.cluster))?;
                let password = self.config.get("immpasswd")?;
                let ipmi = |verb: &str| {
                    Command::Local(
                        LocalCommand::new(
                            format!(
                                "sudo ipmitool -I lanplus -H {admin} -U {user} -P '{password}' chassis power {verb}"
                            ),
                            timeouts.command,
                        )
                        .with_secret(password.clone()),
                    )
                };
                slots.insert(Action::PowerOn, ipmi("on"));
                slots.insert(Action::PowerCut, ipmi("off"));
                slots.insert(Action::SoftPowerOff, ipmi("soft"));
                slots.insert(Action::HardReboot, ipmi("reset"));
                status.push(ipmi("status"));

                if self.management == Management::DmtfIpmi {
                    let led = |command: &str| {
                        let mut ssh = self.ssh_template(&admin, timeouts);
                        ssh.command = command.to_string();
                        ssh.user = DMTF_LED_USER.to_string();
                        ssh.timeout = DMTF_LED_TIMEOUT;
                        Command::Ssh(ssh.with_password(Some(password.clone())))
                    };
                    slots.insert(Action::LedOn, led("start /system1/led1"));
                    slots.insert(Action::LedOff, led("stop /system1/led1"));
                }
                Ok((admin, None))
            }
            Management::Unmanaged => Ok((self.hostname.to_string(), None)),
            Management::Test => Ok((self.hostname.to_string(), None)),
        }
    }

    fn assemble_test(&self) -> Assembly {
        let target = format!("{}.{}", self.id, self.cluster);
        let test = |what: &str| Command::Test(format!("{what} on {target}"));

        let mut slots: BTreeMap<Action, Command> = Action::ALL
            .iter()
            .map(|action| (*action, test(action.name())))
            .collect();

        let mut status = vec![test("status")];
        let mut scheduler = None;
        match self.role {
            Role::Worker => {
                if let Some(master) = self.master {
                    let source: Arc<dyn SchedulerStateSource> = Arc::<Node>::clone(master);
                    status.push(Command::PbsNodeState {
                        node_id: self.id.to_string(),
                        source,
                    });
                }
            }
            Role::Master => {
                scheduler = Some(SchedulerCommands {
                    list: test("pbsnodes").parsed(Parse::PbsNodes),
                    probe: test("pbsnodes"),
                });
            }
            Role::Storage => {
                for action in [
                    Action::PbsMomStatus,
                    Action::PbsMomStop,
                    Action::PbsMomRestart,
                    Action::PbsMomCleanup,
                    Action::FixDownOnError,
                    Action::PauseScheduler,
                    Action::ResumeScheduler,
                    Action::RestartScheduler,
                ] {
                    slots.remove(&action);
                }
            }
        }
        if self.role == Role::Worker {
            for action in [
                Action::PauseScheduler,
                Action::ResumeScheduler,
                Action::RestartScheduler,
            ] {
                slots.remove(&action);
            }
        }

        Assembly {
            slots,
            status: Command::Composite(status),
            shell: Shell::Test { node: target },
            admin_host: self.hostname.to_string(),
            monitoring_alias: None,
            scheduler,
        }
    }
}
