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

//! Node selection specifiers: `node601,605-608,node0612`.
//!
//! Splitting is permissive: any token that is not a range is passed on as
//! an id and only fails when it is resolved to a node. Range bounds must be
//! numeric ids though.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::node::{CompositeNode, Node};

static NODE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:node)?(\d{3,4})$").unwrap());
static MASTER_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"master\d*").unwrap());

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Empty node specifier")]
    EmptySpecifier,

    #[error("could not parse ids from {token}")]
    UnparsableId { token: String },

    #[error("Range {expression} runs backwards ({start} > {end})")]
    ReversedRange {
        start: u32,
        end: u32,
        expression: String,
    },
}

/// Numeric part of `NNN` or `nodeNNN` (3 or 4 digits).
pub fn node_number(token: &str) -> Result<u32, SelectorError> {
    NODE_ID_RE
        .captures(token.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| SelectorError::UnparsableId {
            token: token.to_string(),
        })
}

/// Canonical node id: `node` followed by at least three digits.
pub fn normalize_id(token: &str) -> Result<String, SelectorError> {
    Ok(format!("node{:03}", node_number(token)?))
}

/// Expand a specifier into ids, in order, duplicates kept.
pub fn parse_specifier(specifier: &str) -> Result<Vec<String>, SelectorError> {
    if specifier.trim().is_empty() {
        return Err(SelectorError::EmptySpecifier);
    }

    let mut ids = Vec::new();
    for token in specifier.split(',') {
        let bounds: Vec<&str> = token.split('-').collect();
        if bounds.len() != 2 {
            ids.push(token.to_string());
            continue;
        }

        info!("found range specifier: {}", token);
        let start = node_number(bounds[0])?;
        let end = node_number(bounds[1])?;
        if start > end {
            return Err(SelectorError::ReversedRange {
                start,
                end,
                expression: token.to_string(),
            });
        }
        ids.extend((start..=end).map(|i| format!("node{i:03}")));
    }

    debug!("parsed {} into {:?}", specifier, ids);
    Ok(ids)
}

/// Master ids mentioned in `specifier` (`master`, `master1`, ...).
pub fn master_ids(specifier: &str) -> Vec<String> {
    MASTER_ID_RE
        .find_iter(specifier)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Resolve every id through `factory`.
///
/// Ids that cannot be normalized or built are logged and skipped; the
/// remaining nodes are collected without duplicates.
pub async fn resolve<F, Fut, E>(ids: &[String], factory: F) -> CompositeNode
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Arc<Node>, E>>,
    E: Display,
{
    let mut nodes = CompositeNode::new();
    for id in ids {
        let normalized = match normalize_id(id) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!("Could not find {}: {}", id, e);
                continue;
            }
        };
        match factory(normalized.clone()).await {
            Ok(node) => {
                debug!("added node {}", normalized);
                nodes.add(node);
            }
            Err(e) => warn!("Could not find {}: {}", id, e),
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_ids_pass_through() {
        assert_eq!(
            parse_specifier("node2201,201,magikarp").unwrap(),
            vec!["node2201", "201", "magikarp"]
        );
    }

    #[test]
    fn test_ranges_expand() {
        assert_eq!(
            parse_specifier("node601,605-node608").unwrap(),
            vec!["node601", "node605", "node606", "node607", "node608"]
        );
        let ids = parse_specifier("0998-1001").unwrap();
        assert_eq!(ids, vec!["node998", "node999", "node1000", "node1001"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        assert_eq!(
            parse_specifier("node601,601-602").unwrap(),
            vec!["node601", "node601", "node602"]
        );
    }

    #[test]
    fn test_nested_dashes_are_not_ranges() {
        assert_eq!(
            parse_specifier("node1-2-3").unwrap(),
            vec!["node1-2-3"]
        );
    }

    #[test]
    fn test_bad_range_bounds() {
        assert_eq!(
            parse_specifier("node601-x12"),
            Err(SelectorError::UnparsableId {
                token: "x12".to_string()
            })
        );
        assert!(matches!(
            parse_specifier("608-605"),
            Err(SelectorError::ReversedRange { start: 608, end: 605, .. })
        ));
        assert_eq!(parse_specifier(" "), Err(SelectorError::EmptySpecifier));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_id("201").unwrap(), "node201");
        assert_eq!(normalize_id("node2201").unwrap(), "node2201");
        assert_eq!(normalize_id("0042").unwrap(), "node042");
        assert!(normalize_id("node120Xde#").is_err());
        assert!(normalize_id("node12").is_err());
    }

    #[test]
    fn test_master_ids() {
        assert_eq!(master_ids("master1,master3"), vec!["master1", "master3"]);
        assert!(master_ids("node001").is_empty());
    }
}
