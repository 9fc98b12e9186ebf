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

//! Post-processing of raw command output.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::outcome::{Outcome, Output};

static POWER_STATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Power:\s+(\S+)").unwrap());

// `pbsnodes` prints the node name on its own line (`node2201.shuppet.gent.vsc`)
// followed by indented attributes, one of which is `state = ...`.
static PBS_NODES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(node\d+).*?.vsc\n.*state = (.*?)\n").unwrap());

/// How to interpret the output of the wrapped command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parse {
    /// IMM `power state`: keep the word after `Power:`.
    ImmPowerState,
    /// Blade chassis `power -state`: keep the last line.
    BladeState,
    /// `idracadm serveraction powerstatus`: keep the text after the last `:`.
    DracStatus,
    /// `pbsnodes`: map node id to scheduler state.
    PbsNodes,
    /// `uname`: is this a live Linux host?
    SshAlive,
}

impl Parse {
    pub fn apply(self, raw: Outcome) -> Outcome {
        match self {
            Parse::ImmPowerState => parse_imm_power_state(raw),
            Parse::BladeState => passthrough_on_error(raw, |text| {
                Outcome::text(text.trim().lines().last().unwrap_or_default().trim())
            }),
            Parse::DracStatus => passthrough_on_error(raw, |text| {
                Outcome::text(text.trim().rsplit(':').next().unwrap_or_default().trim())
            }),
            Parse::PbsNodes => {
                let states = raw.as_text().map(parse_pbs_nodes).unwrap_or_default();
                Outcome::new(Output::States(states), raw.error)
            }
            Parse::SshAlive => {
                let alive = raw.as_text().map(|t| t.trim() == "Linux").unwrap_or(false);
                Outcome::new(Output::Flag(alive), raw.error)
            }
        }
    }
}

fn passthrough_on_error(raw: Outcome, parse: impl FnOnce(&str) -> Outcome) -> Outcome {
    if raw.error.is_some() {
        return raw;
    }
    match raw.as_text() {
        Some(text) => parse(text),
        None => raw,
    }
}

fn parse_imm_power_state(raw: Outcome) -> Outcome {
    let text = match raw.as_text() {
        Some(text) if raw.error.is_none() && !text.is_empty() => text,
        _ => return raw,
    };
    match POWER_STATE_RE.captures(text) {
        Some(caps) => Outcome::text(&caps[1]),
        None => {
            tracing::warn!("Regexp did not match in power state output");
            Outcome::failed(
                raw.output.clone(),
                "could not parse power state from IMM output",
            )
        }
    }
}

pub fn parse_pbs_nodes(text: &str) -> BTreeMap<String, String> {
    PBS_NODES_RE
        .captures_iter(text)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PBSNODES: &str = "node2201.shuppet.gent.vsc\n     state = free\n     np = 16\n\
node2202.shuppet.gent.vsc\n     state = down,offline\n     np = 16\n";

    #[test]
    fn test_imm_power_state() {
        let raw = Outcome::text("power state\r\nPower: On\r\nState: Booting OS\r\n\r\nsystem>");
        assert_eq!(Parse::ImmPowerState.apply(raw), Outcome::text("On"));

        let garbage = Outcome::text("system>");
        let parsed = Parse::ImmPowerState.apply(garbage);
        assert_eq!(parsed.output, Output::Text("system>".into()));
        assert!(parsed.error.is_some());
    }

    #[test]
    fn test_blade_and_drac_status() {
        let blade = Outcome::text("system> power -state -T system:blade[3]\nOn\n");
        assert_eq!(Parse::BladeState.apply(blade), Outcome::text("On"));

        let drac = Outcome::text("Server power status: ON");
        assert_eq!(Parse::DracStatus.apply(drac), Outcome::text("ON"));

        let failed = Outcome::failed(Output::Text(String::new()), "exitcode: 1");
        assert_eq!(Parse::DracStatus.apply(failed.clone()), failed);
    }

    #[test]
    fn test_pbs_nodes() {
        let states = parse_pbs_nodes(PBSNODES);
        assert_eq!(states.len(), 2);
        assert_eq!(states["node2201"], "free");
        assert_eq!(states["node2202"], "down,offline");
    }

    #[test]
    fn test_ssh_alive_keeps_error() {
        let parsed = Parse::SshAlive.apply(Outcome::text("Linux"));
        assert_eq!(parsed, Outcome::ok(Output::Flag(true)));

        let parsed = Parse::SshAlive.apply(Outcome::failed(
            Output::Text(String::new()),
            "could not connect to node001",
        ));
        assert_eq!(parsed.output, Output::Flag(false));
        assert!(parsed.error.is_some());
    }
}
