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

//! Error types for configuration lookups and template rendering

use thiserror::Error;

/// Errors raised by the configuration provider
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A key was requested that none of the loaded files define
    #[error("could not find configuration for '{key}', make sure it is present in one of: {locations}")]
    MissingKey { key: String, locations: String },

    /// A template references a placeholder the caller did not supply
    #[error("template '{template}' needs parameter '{param}' which was not supplied")]
    MissingTemplateParam { template: String, param: String },

    /// A template has an unterminated or malformed placeholder
    #[error("malformed template '{template}': {reason}")]
    MalformedTemplate { template: String, reason: String },

    /// A value exists but cannot be interpreted as the requested type
    #[error("invalid value '{value}' for '{key}': {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
