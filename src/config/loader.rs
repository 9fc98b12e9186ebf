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

//! Configuration loading and priority management.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::{Config, ConfigFile};
use super::utils::expand_tilde;

/// Site-wide defaults shipped with the package.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/misty/defaults.yaml";

/// Standard locations, lowest priority first.
pub fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![
        PathBuf::from(DEFAULT_CONFIG_FILE),
        PathBuf::from("/etc/misty.yaml"),
    ];

    if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
        locations.push(PathBuf::from(xdg_config_home).join("misty").join("config.yaml"));
    } else if let Some(dirs) = ProjectDirs::from("", "", "misty") {
        locations.push(dirs.config_dir().join("config.yaml"));
    }

    locations.push(PathBuf::from("misty.yaml"));
    locations
}

impl Config {
    /// Load configuration from a single file.
    pub async fn load(path: &Path) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        let content = fs::read_to_string(&expanded_path)
            .await
            .with_context(|| format!("Failed to read configuration file at {}. Please check file permissions and ensure the file is accessible.", expanded_path.display()))?;

        Self::parse(&content, expanded_path)
    }

    /// Parse YAML content that was read from `source`.
    pub fn parse(content: &str, source: PathBuf) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content).with_context(|| {
            format!(
                "Failed to parse YAML configuration file at {}. Please check the YAML syntax is valid.",
                source.display()
            )
        })?;
        Ok(Self::from_file(file, source))
    }

    /// Load configuration from every standard location that exists.
    ///
    /// Files are layered on top of the built-in defaults in this order:
    /// 1. `/etc/misty/defaults.yaml`
    /// 2. `/etc/misty.yaml`
    /// 3. `$XDG_CONFIG_HOME/misty/config.yaml` (or the platform config dir)
    /// 4. `./misty.yaml`
    /// 5. The explicit `--config` path
    ///
    /// Later files override keys from earlier ones.
    pub async fn load_with_priority(cli_config_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::builtin_defaults();
        let mut found = false;

        for location in default_locations() {
            if location.exists() {
                tracing::debug!("Loading configuration from {:?}", location);
                config.merge(Self::load(&location).await?);
                found = true;
            }
        }

        if let Some(path) = cli_config_path {
            let expanded = expand_tilde(path);
            if !expanded.exists() {
                anyhow::bail!(
                    "Configuration file {} given on the command line does not exist",
                    expanded.display()
                );
            }
            tracing::debug!("Using explicitly specified config file: {:?}", expanded);
            config.merge(Self::load(&expanded).await?);
            found = true;
        }

        if !found {
            tracing::warn!(
                "No configuration file found, make sure at least {} is present",
                DEFAULT_CONFIG_FILE
            );
        }

        Ok(config)
    }
}
