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

//! Reachability probe: can a TCP connection to the SSH port be opened?

use std::time::Duration;
use tokio::net::TcpStream;

use super::outcome::{Outcome, Output};

#[derive(Debug, Clone)]
pub struct TcpPing {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl TcpPing {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port: super::ssh::DEFAULT_SSH_PORT,
            timeout,
        }
    }

    pub fn describe(&self) -> String {
        format!("TcpPing: {}:{}", self.host, self.port)
    }

    pub async fn run(&self) -> Outcome {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let outcome = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => Outcome::ok(Output::Flag(true)),
            Ok(Err(e)) => {
                tracing::info!("tcpping on host {} failed with {}", self.host, e);
                Outcome::failed(Output::Flag(false), e.to_string())
            }
            Err(_) => {
                tracing::info!("tcpping on host {} timed out", self.host);
                Outcome::failed(
                    Output::Flag(false),
                    format!("tcp connect to {}:{} timed out", self.host, self.port),
                )
            }
        };
        tracing::debug!(
            "tcpping host {} port {} returns {}",
            self.host,
            self.port,
            outcome.output
        );
        outcome
    }
}
