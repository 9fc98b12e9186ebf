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

//! SSH connection management and establishment.

use russh::client::{Config, Handle, Handler};
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::authentication::{authenticate_any, AuthMethod};
use super::Error;

/// Host key verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerCheckMethod {
    /// Accept any host key. Management controllers regenerate their keys on
    /// firmware updates, so this is the default.
    NoCheck,
    /// Use default known_hosts file (~/.ssh/known_hosts)
    DefaultKnownHostsFile,
}

impl ServerCheckMethod {
    /// Interpret the `ssh_strict_host_key_checking` configuration value.
    pub fn from_config_value(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "yes" | "true" | "1" => Self::DefaultKnownHostsFile,
            _ => Self::NoCheck,
        }
    }
}

/// An authenticated ssh connection to a remote server.
#[derive(Clone)]
pub struct Client {
    pub(super) connection_handle: Arc<Handle<ClientHandler>>,
    pub(super) username: String,
    pub(super) address: SocketAddr,
}

impl Client {
    /// Resolve `host`, connect to the first address that answers and
    /// authenticate with the first method that succeeds.
    ///
    /// The whole connect phase, including authentication, is bounded by
    /// `connect_timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        auth: &[AuthMethod],
        server_check: ServerCheckMethod,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        match tokio::time::timeout(
            connect_timeout,
            Self::connect_inner(host, port, username, auth, server_check),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectTimeout {
                host: host.to_string(),
                secs: connect_timeout.as_secs(),
            }),
        }
    }

    async fn connect_inner(
        host: &str,
        port: u16,
        username: &str,
        auth: &[AuthMethod],
        server_check: ServerCheckMethod,
    ) -> Result<Self, Error> {
        let config = Arc::new(Config::default());

        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(Error::AddressInvalid)?
            .collect();

        let mut connect_res = Err(Error::AddressInvalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "could not resolve to any addresses",
        )));
        for socket_addr in socket_addrs {
            let handler = ClientHandler {
                hostname: host.to_string(),
                host: socket_addr,
                server_check: server_check.clone(),
            };
            match russh::client::connect(config.clone(), socket_addr, handler).await {
                Ok(h) => {
                    connect_res = Ok((socket_addr, h));
                    break;
                }
                Err(e) => connect_res = Err(e),
            }
        }
        let (address, mut handle) = connect_res?;

        authenticate_any(&mut handle, username, auth).await?;

        Ok(Self {
            connection_handle: Arc::new(handle),
            username: username.to_string(),
            address,
        })
    }

    /// Disconnect from the remote host.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.connection_handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(Error::SshError)
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("address", &self.address)
            .field("connection_handle", &"Handle<ClientHandler>")
            .finish()
    }
}

/// SSH client handler for managing server key verification.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
    host: SocketAddr,
    server_check: ServerCheckMethod,
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match &self.server_check {
            ServerCheckMethod::NoCheck => Ok(true),
            ServerCheckMethod::DefaultKnownHostsFile => {
                let result = russh::keys::check_known_hosts(
                    &self.hostname,
                    self.host.port(),
                    server_public_key,
                )
                .map_err(|_| Error::ServerCheckFailed)?;

                Ok(result)
            }
        }
    }
}
