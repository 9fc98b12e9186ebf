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

use std::fmt;

/// An operation that can be queued on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    PowerOn,
    /// Hard power off.
    PowerCut,
    SoftPowerOff,
    HardReboot,
    SoftReboot,
    LedOn,
    LedOff,
    PbsMomStatus,
    PbsMomStop,
    PbsMomRestart,
    PbsMomCleanup,
    FixDownOnError,
    PauseScheduler,
    ResumeScheduler,
    RestartScheduler,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::PowerOn,
        Action::PowerCut,
        Action::SoftPowerOff,
        Action::HardReboot,
        Action::SoftReboot,
        Action::LedOn,
        Action::LedOff,
        Action::PbsMomStatus,
        Action::PbsMomStop,
        Action::PbsMomRestart,
        Action::PbsMomCleanup,
        Action::FixDownOnError,
        Action::PauseScheduler,
        Action::ResumeScheduler,
        Action::RestartScheduler,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::PowerOn => "poweron",
            Action::PowerCut => "powercut",
            Action::SoftPowerOff => "softpoweroff",
            Action::HardReboot => "hardreboot",
            Action::SoftReboot => "softreboot",
            Action::LedOn => "ledon",
            Action::LedOff => "ledoff",
            Action::PbsMomStatus => "pbsmomstatus",
            Action::PbsMomStop => "pbsmomstop",
            Action::PbsMomRestart => "pbsmomrestart",
            Action::PbsMomCleanup => "pbsmomcleanup",
            Action::FixDownOnError => "fixdownonerror",
            Action::PauseScheduler => "pause",
            Action::ResumeScheduler => "resume",
            Action::RestartScheduler => "restart",
        }
    }

    /// Actions that take the node down and deserve a monitoring downtime.
    pub fn affects_power(self) -> bool {
        matches!(
            self,
            Action::PowerOn
                | Action::PowerCut
                | Action::SoftPowerOff
                | Action::HardReboot
                | Action::SoftReboot
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<&str> = Action::ALL.iter().map(|a| a.name()).collect();
        assert_eq!(names.len(), Action::ALL.len());
    }

    #[test]
    fn test_power_actions() {
        assert!(Action::HardReboot.affects_power());
        assert!(!Action::LedOn.affects_power());
        assert_eq!(Action::PbsMomCleanup.to_string(), "pbsmomcleanup");
    }
}
