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

//! Commands run on a remote host over SSH.

use std::time::Duration;
use zeroize::Zeroizing;

use super::outcome::{Outcome, Output};
use crate::ssh::{AuthMethod, Client, Error, ServerCheckMethod};

pub const DEFAULT_SSH_PORT: u16 = 22;

/// One command string executed over one SSH session.
#[derive(Clone)]
pub struct SshCommand {
    pub command: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<Zeroizing<String>>,
    /// Bounds the channel exchange, not the connect phase.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub server_check: ServerCheckMethod,
}

impl SshCommand {
    pub fn new(
        command: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            password: None,
            timeout,
            connect_timeout: Duration::from_secs(10),
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty()).map(Zeroizing::new);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub fn describe(&self) -> String {
        format!(
            "SshCommand: {}@{}:{} command: {}",
            self.user, self.host, self.port, self.command
        )
    }

    pub async fn run(&self) -> Outcome {
        let auth = AuthMethod::chain(self.password.as_ref().map(|p| p.as_str()));
        let client = match Client::connect(
            &self.host,
            self.port,
            &self.user,
            &auth,
            self.server_check.clone(),
            self.connect_timeout,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                tracing::info!("Problem occured trying to connect to {}: {}", self.host, e);
                return Outcome::failed(
                    Output::Text(String::new()),
                    format!("could not connect to {}", self.host),
                );
            }
        };

        tracing::debug!(
            "going to run '{}' on '{}' as '{}' (using password: {}, timeout: {:?})",
            self.command,
            self.host,
            self.user,
            self.password.is_some(),
            self.timeout
        );

        let outcome = match client.execute(&self.command, self.timeout).await {
            Ok(result) => {
                let stderr = result.stderr.trim().to_string();
                let error = if stderr.is_empty() && result.exit_status != 0 {
                    format!("exitcode: {}", result.exit_status)
                } else {
                    stderr
                };
                Outcome::new(
                    Output::Text(result.stdout.trim().to_string()),
                    Some(error),
                )
            }
            Err(Error::CommandTimedOut) => {
                tracing::info!("{} on {} timed out", self.command, self.host);
                Outcome::failed(Output::Text(String::new()), "ssh command timed out")
            }
            Err(e) => {
                tracing::info!(
                    "Problem occured trying to run {} on {}: {}",
                    self.command,
                    self.host,
                    e
                );
                Outcome::failed(Output::Text(String::new()), e.to_string())
            }
        };

        if let Err(e) = client.disconnect().await {
            tracing::debug!("disconnect from {} failed: {}", self.host, e);
        }
        tracing::debug!(
            "{} on {} returned out: {}, err: {:?}",
            self.command,
            self.host,
            outcome.output,
            outcome.error
        );
        outcome
    }
}

impl std::fmt::Debug for SshCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCommand")
            .field("command", &self.command)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_reported_not_raised() {
        // Port 1 on localhost refuses connections on any sane test machine.
        let mut command = SshCommand::new("uname", "127.0.0.1", "root", Duration::from_secs(2))
            .with_password(Some("secret".to_string()))
            .with_connect_timeout(Duration::from_secs(2));
        command.port = 1;

        let outcome = command.run().await;
        assert_eq!(outcome.output, Output::Text(String::new()));
        assert_eq!(
            outcome.error.as_deref(),
            Some("could not connect to 127.0.0.1")
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let command = SshCommand::new("uname", "node001", "root", Duration::from_secs(1))
            .with_password(Some("hunter2".to_string()));
        let rendered = format!("{command:?}");
        assert!(!rendered.contains("hunter2"));
        assert_eq!(
            command.describe(),
            "SshCommand: root@node001:22 command: uname"
        );
    }
}
