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

//! Errors raised by the SSH transport.
//!
//! These never leave [`crate::command::Command::run`]: the command layer
//! turns them into the error half of an outcome.

use std::io;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Key authentication failed")]
    KeyAuthFailed,
    #[error("Unable to load key, bad format or passphrase: {0}")]
    KeyInvalid(russh::keys::Error),
    #[error("Password authentication failed")]
    PasswordWrong,
    #[error("Invalid address was provided: {0}")]
    AddressInvalid(io::Error),
    #[error("The executed command didn't send an exit code")]
    CommandDidntExit,
    #[error("ssh command timed out")]
    CommandTimedOut,
    #[error("Server check failed")]
    ServerCheckFailed,
    #[error("Failed to connect to SSH agent")]
    AgentConnectionFailed,
    #[error("Failed to request identities from SSH agent")]
    AgentRequestIdentitiesFailed,
    #[error("SSH agent has no identities")]
    AgentNoIdentities,
    #[error("SSH agent authentication failed")]
    AgentAuthenticationFailed,
    #[error("No authentication method succeeded for {user}")]
    NoAuthMethodSucceeded { user: String },
    #[error("Connection to {host} timed out after {secs} seconds")]
    ConnectTimeout { host: String, secs: u64 },
    #[error("SSH error: {0}")]
    SshError(#[from] russh::Error),
}
