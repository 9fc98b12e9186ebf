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

//! Configuration utility functions.

use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Expand tilde (~) in path to home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if path_str == "~" || path_str.starts_with("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(path_str.replacen('~', &home, 1));
            }
        }
    }
    path.to_path_buf()
}

/// Expand a leading tilde in a plain string value.
pub fn expand_tilde_str(value: &str) -> String {
    expand_tilde(Path::new(value)).to_string_lossy().into_owned()
}

/// Render a `{name}` style template.
///
/// Supported placeholders:
/// - `{name}` inserts the parameter verbatim
/// - `{name:0N}` zero-pads a numeric parameter to `N` digits
/// - `{{` and `}}` produce literal braces
///
/// Inserted values are never rescanned, so parameters may themselves contain
/// braces (regular expressions with `{3,4}` quantifiers, for instance).
pub fn render_template(template: &str, params: &[(&str, &str)]) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    spec.push(c);
                }
                if !closed {
                    return Err(ConfigError::MalformedTemplate {
                        template: template.to_string(),
                        reason: format!("unterminated placeholder '{{{spec}'"),
                    });
                }
                out.push_str(&render_placeholder(template, &spec, params)?);
            }
            _ => out.push(ch),
        }
    }

    Ok(out)
}

fn render_placeholder(
    template: &str,
    spec: &str,
    params: &[(&str, &str)],
) -> Result<String, ConfigError> {
    let (name, width) = match spec.split_once(':') {
        Some((name, fmt)) => {
            let digits = fmt.strip_prefix('0').unwrap_or(fmt);
            let width = digits
                .parse::<usize>()
                .map_err(|_| ConfigError::MalformedTemplate {
                    template: template.to_string(),
                    reason: format!("bad width '{fmt}' for '{name}'"),
                })?;
            (name, Some(width))
        }
        None => (spec, None),
    };

    let value = params
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
        .ok_or_else(|| ConfigError::MissingTemplateParam {
            template: template.to_string(),
            param: name.to_string(),
        })?;

    match width {
        Some(width) => match value.parse::<u64>() {
            Ok(number) => Ok(format!("{number:0width$}")),
            Err(_) => Ok(format!("{value:>width$}")),
        },
        None => Ok(value.to_string()),
    }
}
