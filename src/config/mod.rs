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

//! Configuration management for misty.
//!
//! The configuration is a flat, case-insensitive key/value store (the
//! `raw_configs` section of each YAML file) plus optional cluster profile
//! overrides. Templates use `{name}` placeholders.

mod error;
mod loader;
mod types;
mod utils;

pub use error::ConfigError;
pub use loader::{default_locations, DEFAULT_CONFIG_FILE};
pub use types::{ClusterProfileConfig, Config};
pub use utils::{expand_tilde, render_template};
