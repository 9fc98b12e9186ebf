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

//! Commands driven through an interactive telnet login.
//!
//! The session is a fixed script: wait for the login prompt, send the user,
//! optionally wait for the password prompt and send the password, wait for
//! the shell prompt, send the command, read until the next shell prompt and
//! log off. Every wait is bounded by the command timeout. Option negotiation
//! requests from the server are refused.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use zeroize::Zeroizing;

use super::outcome::{Outcome, Output};

pub const DEFAULT_TELNET_PORT: u16 = 23;
pub const LOGIN_PROMPT: &str = "login :";
pub const PASSWORD_PROMPT: &str = "Password:";
pub const DEFAULT_SHELL_PROMPT: &str = ">";
const LOGOFF: &str = "exit";

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Clone)]
pub struct TelnetCommand {
    pub command: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<Zeroizing<String>>,
    pub timeout: Duration,
    pub prompt: String,
}

#[derive(Debug, thiserror::Error)]
enum TelnetError {
    #[error("timed out after {secs:.1}s waiting for '{expected}'")]
    Timeout { expected: String, secs: f64 },
    #[error("connection closed while waiting for '{expected}'")]
    Closed { expected: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TelnetCommand {
    pub fn new(
        command: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            host: host.into(),
            port: DEFAULT_TELNET_PORT,
            user: user.into(),
            password: password.filter(|p| !p.is_empty()).map(Zeroizing::new),
            timeout,
            prompt: DEFAULT_SHELL_PROMPT.to_string(),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "TelnetCommand: {}@{}:{} command: {}",
            self.user, self.host, self.port, self.command
        )
    }

    pub async fn run(&self) -> Outcome {
        match self.session().await {
            Ok(out) => {
                tracing::debug!(
                    "cmds {} on host {} ran with output: {}",
                    self.command,
                    self.host,
                    out
                );
                Outcome::ok(Output::Text(out))
            }
            Err(e) => {
                tracing::warn!("Failed running {} on {}:{}", self.command, self.host, e);
                Outcome::failed(Output::None, e.to_string())
            }
        }
    }

    async fn session(&self) -> Result<String, TelnetError> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| TelnetError::Timeout {
                expected: format!("connection to {}:{}", self.host, self.port),
                secs: self.timeout.as_secs_f64(),
            })??;
        let mut session = Session::new(stream, self.timeout);

        tracing::debug!("waiting for {}", LOGIN_PROMPT);
        session.read_until(LOGIN_PROMPT).await?;
        session.write_line(&self.user).await?;
        if let Some(password) = &self.password {
            tracing::debug!("waiting for {}", PASSWORD_PROMPT);
            session.read_until(PASSWORD_PROMPT).await?;
            session.write_line(password).await?;
        }
        session.read_until(&self.prompt).await?;

        tracing::debug!("Run going to run {}", self.command);
        session.write_line(&self.command).await?;
        let out = session.read_until(&self.prompt).await?;
        session.write_line(LOGOFF).await?;
        Ok(out)
    }
}

impl std::fmt::Debug for TelnetCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetCommand")
            .field("command", &self.command)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("timeout", &self.timeout)
            .field("prompt", &self.prompt)
            .finish()
    }
}

/// Minimal NVT client: strips and refuses option negotiation, buffers text.
struct Session {
    stream: TcpStream,
    timeout: Duration,
    pending: Vec<u8>,
    text: Vec<u8>,
}

impl Session {
    fn new(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            stream,
            timeout,
            pending: Vec::new(),
            text: Vec::new(),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), TelnetError> {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Read until `expected` shows up; return everything up to and
    /// including it. Text after the match stays buffered.
    async fn read_until(&mut self, expected: &str) -> Result<String, TelnetError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let needle = expected.as_bytes();
        let mut buffer = [0u8; 1024];

        loop {
            if let Some(pos) = find(&self.text, needle) {
                let rest = self.text.split_off(pos + needle.len());
                let matched = std::mem::replace(&mut self.text, rest);
                return Ok(String::from_utf8_lossy(&matched).to_string());
            }

            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buffer))
                .await
                .map_err(|_| TelnetError::Timeout {
                    expected: expected.to_string(),
                    secs: self.timeout.as_secs_f64(),
                })??;
            if read == 0 {
                return Err(TelnetError::Closed {
                    expected: expected.to_string(),
                });
            }
            self.pending.extend_from_slice(&buffer[..read]);
            let replies = self.process_pending();
            if !replies.is_empty() {
                self.stream.write_all(&replies).await?;
            }
        }
    }

    /// Move plain text from `pending` to `text`, answering negotiation.
    /// An incomplete command sequence stays in `pending`.
    fn process_pending(&mut self) -> Vec<u8> {
        let mut replies = Vec::new();
        let mut i = 0;
        let data = std::mem::take(&mut self.pending);

        while i < data.len() {
            if data[i] != IAC {
                self.text.push(data[i]);
                i += 1;
                continue;
            }
            let Some(&cmd) = data.get(i + 1) else {
                break;
            };
            match cmd {
                IAC => {
                    self.text.push(IAC);
                    i += 2;
                }
                DO | DONT | WILL | WONT => {
                    let Some(&option) = data.get(i + 2) else {
                        break;
                    };
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    i += 3;
                }
                SB => match find(&data[i..], &[IAC, SE]) {
                    Some(end) => i += end + 2,
                    None => break,
                },
                _ => i += 2,
            }
        }

        self.pending = data[i..].to_vec();
        replies
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// A tiny IMM lookalike that negotiates an option, logs in and answers
    /// one command.
    async fn fake_imm() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read);

            write.write_all(&[IAC, DO, 24]).await.unwrap();
            write.write_all(b"IMM login :").await.unwrap();

            // The refusal comes back before the user name.
            let mut refusal = [0u8; 3];
            lines.read_exact(&mut refusal).await.unwrap();
            assert_eq!(refusal, [IAC, WONT, 24]);

            let mut line = String::new();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "USERID");
            write.write_all(b"Password:").await.unwrap();
            line.clear();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "PASSW0RD");
            write.write_all(b"\r\nsystem>").await.unwrap();
            line.clear();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "power state");
            write
                .write_all(b"power state\r\nPower: On\r\nState: Booting OS\r\n\r\nsystem>")
                .await
                .unwrap();
            line.clear();
            lines.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "exit");
        });
        port
    }

    #[tokio::test]
    async fn test_login_script() {
        let port = fake_imm().await;
        let mut command = TelnetCommand::new(
            "power state",
            "127.0.0.1",
            "USERID",
            Some("PASSW0RD".to_string()),
            Duration::from_secs(5),
        );
        command.port = port;

        let outcome = command.run().await;
        assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
        let text = outcome.as_text().unwrap();
        assert!(text.contains("Power: On"));
        assert!(text.ends_with('>'));
    }

    #[tokio::test]
    async fn test_missing_prompt_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"Welcome\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut command = TelnetCommand::new(
            "power state",
            "127.0.0.1",
            "USERID",
            None,
            Duration::from_millis(200),
        );
        command.port = port;

        let outcome = command.run().await;
        assert_eq!(outcome.output, Output::None);
        assert!(outcome.error.unwrap().contains("login :"));
    }
}
