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

//! The `(output, error)` pair every command produces.

use std::collections::BTreeMap;
use std::fmt;

/// Output half of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Output {
    #[default]
    None,
    Text(String),
    Flag(bool),
    /// Scheduler state per node id.
    States(BTreeMap<String, String>),
    /// One outcome per member of a composite command.
    Many(Vec<Outcome>),
}

/// Result of running one command.
///
/// Ordinary remote failures (connection refused, non-zero exit, timeouts)
/// are reported through `error`, never as a Rust error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Outcome {
    pub output: Output,
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok(output: Output) -> Self {
        Self {
            output,
            error: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::ok(Output::Text(text.into()))
    }

    /// Build an outcome, dropping an empty error string.
    pub fn new(output: Output, error: Option<String>) -> Self {
        Self {
            output,
            error: error.filter(|e| !e.is_empty()),
        }
    }

    pub fn failed(output: Output, error: impl Into<String>) -> Self {
        Self::new(output, Some(error.into()))
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The text output, if this outcome carries any.
    pub fn as_text(&self) -> Option<&str> {
        match &self.output {
            Output::Text(text) => Some(text),
            _ => None,
        }
    }

    /// All errors in this outcome, including those of nested outcomes.
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(error) = &self.error {
            errors.push(error.clone());
        }
        if let Output::Many(children) = &self.output {
            for child in children {
                errors.extend(child.errors());
            }
        }
        errors
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::None => write!(f, "None"),
            Output::Text(text) => write!(f, "{text}"),
            Output::Flag(flag) => write!(f, "{flag}"),
            Output::States(states) => {
                let rendered: Vec<String> =
                    states.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            Output::Many(children) => {
                let rendered: Vec<String> =
                    children.iter().map(|c| c.output.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_error_is_dropped() {
        let outcome = Outcome::new(Output::Text("ok".into()), Some(String::new()));
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_nested_errors_are_collected() {
        let outcome = Outcome::ok(Output::Many(vec![
            Outcome::ok(Output::Flag(true)),
            Outcome::failed(Output::Flag(false), "could not connect to node001"),
            Outcome::failed(Output::None, "exitcode: 3"),
        ]));
        assert_eq!(
            outcome.errors(),
            vec!["could not connect to node001", "exitcode: 3"]
        );
        assert_eq!(outcome.output.to_string(), "[true, false, None]");
    }
}
