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

//! SSH authentication methods.
//!
//! Management controllers and cluster nodes are reached either with a
//! configured password or, when none is configured, with the SSH agent and
//! the user's default key files.

use russh::client::{Handle, Handler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

use super::Error;

/// Key files tried, in order, when no password is configured.
const DEFAULT_KEY_FILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// An authentification token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password(Zeroizing<String>),
    PrivateKeyFile {
        key_file_path: PathBuf,
        key_pass: Option<Zeroizing<String>>,
    },
    Agent,
}

impl AuthMethod {
    /// Convenience method to create a [`AuthMethod`] from a string literal.
    pub fn with_password(password: &str) -> Self {
        Self::Password(Zeroizing::new(password.to_string()))
    }

    pub fn with_key_file<T: AsRef<Path>>(key_file_path: T, passphrase: Option<&str>) -> Self {
        Self::PrivateKeyFile {
            key_file_path: key_file_path.as_ref().to_path_buf(),
            key_pass: passphrase.map(|p| Zeroizing::new(p.to_string())),
        }
    }

    pub fn with_agent() -> Self {
        Self::Agent
    }

    /// The ordered list of methods to try for a target.
    ///
    /// A configured password disables agent and key lookup entirely.
    pub fn chain(password: Option<&str>) -> Vec<Self> {
        if let Some(password) = password {
            return vec![Self::with_password(password)];
        }

        let mut methods = Vec::new();
        if std::env::var_os("SSH_AUTH_SOCK").is_some() {
            methods.push(Self::Agent);
        }
        if let Some(home) = std::env::var_os("HOME") {
            let ssh_dir = PathBuf::from(home).join(".ssh");
            for name in DEFAULT_KEY_FILES {
                let path = ssh_dir.join(name);
                if path.exists() {
                    methods.push(Self::with_key_file(path, None));
                }
            }
        }
        methods
    }
}

/// Try each method in turn until one succeeds.
pub(super) async fn authenticate_any<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    methods: &[AuthMethod],
) -> Result<(), Error> {
    let mut last_error = None;
    for method in methods {
        match authenticate(handle, username, method).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!("authentication as {} failed: {}", username, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::NoAuthMethodSucceeded {
        user: username.to_string(),
    }))
}

/// This takes a handle and performs authentification with the given method.
async fn authenticate<H: Handler>(
    handle: &mut Handle<H>,
    username: &str,
    auth: &AuthMethod,
) -> Result<(), Error> {
    match auth {
        AuthMethod::Password(password) => {
            let is_authentificated = handle.authenticate_password(username, &***password).await?;
            if !is_authentificated.success() {
                return Err(Error::PasswordWrong);
            }
        }
        AuthMethod::PrivateKeyFile {
            key_file_path,
            key_pass,
        } => {
            let cprivk =
                russh::keys::load_secret_key(key_file_path, key_pass.as_ref().map(|p| p.as_str()))
                    .map_err(Error::KeyInvalid)?;
            let is_authentificated = handle
                .authenticate_publickey(
                    username,
                    russh::keys::PrivateKeyWithHashAlg::new(
                        Arc::new(cprivk),
                        handle.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?;
            if !is_authentificated.success() {
                return Err(Error::KeyAuthFailed);
            }
        }
        AuthMethod::Agent => {
            let mut agent = russh::keys::agent::client::AgentClient::connect_env()
                .await
                .map_err(|_| Error::AgentConnectionFailed)?;

            let identities = agent
                .request_identities()
                .await
                .map_err(|_| Error::AgentRequestIdentitiesFailed)?;

            if identities.is_empty() {
                return Err(Error::AgentNoIdentities);
            }

            let mut auth_success = false;
            for identity in identities {
                let result = handle
                    .authenticate_publickey_with(
                        username,
                        identity.clone(),
                        handle.best_supported_rsa_hash().await?.flatten(),
                        &mut agent,
                    )
                    .await;

                if let Ok(auth_result) = result {
                    if auth_result.success() {
                        auth_success = true;
                        break;
                    }
                }
            }

            if !auth_success {
                return Err(Error::AgentAuthenticationFailed);
            }
        }
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_disables_other_methods() {
        let chain = AuthMethod::chain(Some("hunter2"));
        assert_eq!(chain, vec![AuthMethod::with_password("hunter2")]);
    }
}
