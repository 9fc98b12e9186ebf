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

//! Remote command execution over an established connection.

use std::time::Duration;

use super::connection::Client;
use super::Error;

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandExecutedResult {
    /// The stdout output of the command.
    pub stdout: String,
    /// The stderr output of the command.
    pub stderr: String,
    /// The unix exit status (`$?` in bash).
    pub exit_status: u32,
}

impl Client {
    /// Execute a remote command, bounding the whole channel exchange by
    /// `timeout`.
    ///
    /// Every invocation opens a new session channel.
    pub async fn execute(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandExecutedResult, Error> {
        match tokio::time::timeout(timeout, self.execute_unbounded(command)).await {
            Ok(result) => result,
            Err(_) => Err(Error::CommandTimedOut),
        }
    }

    async fn execute_unbounded(&self, command: &str) -> Result<CommandExecutedResult, Error> {
        let mut stdout_buffer = Vec::new();
        let mut stderr_buffer = Vec::new();
        let mut channel = self.connection_handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut result: Option<u32> = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                russh::ChannelMsg::Data { ref data } => stdout_buffer.extend_from_slice(data),
                russh::ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        stderr_buffer.extend_from_slice(data)
                    }
                }

                // The exit status may arrive before the last data packet, so
                // keep reading until the channel closes.
                russh::ChannelMsg::ExitStatus { exit_status } => result = Some(exit_status),
                _ => {}
            }
        }

        match result {
            Some(exit_status) => Ok(CommandExecutedResult {
                stdout: String::from_utf8_lossy(&stdout_buffer).to_string(),
                stderr: String::from_utf8_lossy(&stderr_buffer).to_string(),
                exit_status,
            }),
            None => Err(Error::CommandDidntExit),
        }
    }
}
