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

//! Commands run as a local child process.
//!
//! The child gets its own process group so the whole pipeline started by
//! `sh -c` can be signalled at once. Liveness is polled rather than awaited:
//! after `timeout` the group receives SIGTERM, and if it is still around one
//! more `timeout` later it receives SIGKILL.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use super::outcome::{Outcome, Output};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A shell command executed on the local host.
#[derive(Clone)]
pub struct LocalCommand {
    pub command: String,
    pub timeout: Duration,
    /// Substrings hidden from [`LocalCommand::describe`] (passwords passed on
    /// the command line of BMC tools).
    pub secrets: Vec<String>,
}

impl LocalCommand {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            secrets: Vec::new(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    pub fn describe(&self) -> String {
        self.secrets
            .iter()
            .fold(self.command.clone(), |acc, secret| acc.replace(secret.as_str(), "***"))
    }

    pub async fn run(&self) -> Outcome {
        tracing::debug!("Run going to run {}", self.describe());

        let mut child = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::info!("Failed to spawn {}: {}", self.describe(), e);
                return Outcome::failed(Output::None, format!("failed to spawn command: {e}"));
            }
        };

        let mut stdout = Drain::spawn(child.stdout.take());
        let mut stderr = Drain::spawn(child.stderr.take());
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));

        let start = Instant::now();
        let mut terminated_at: Option<Instant> = None;
        let mut killed = false;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Failed to poll {}: {}", self.describe(), e);
                    break None;
                }
            }

            match terminated_at {
                None if start.elapsed() > self.timeout => {
                    tracing::debug!(
                        "Timeout occured with cmd {}. took more than {:?} to complete.",
                        self.describe(),
                        self.timeout
                    );
                    signal_group(pgid, Signal::SIGTERM);
                    terminated_at = Some(Instant::now());
                }
                Some(at) if !killed && at.elapsed() > self.timeout => {
                    signal_group(pgid, Signal::SIGKILL);
                    killed = true;
                }
                _ => {}
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        };

        let finished = tokio::time::timeout(self.timeout, async {
            tokio::join!(stdout.finish(), stderr.finish())
        })
        .await
        .is_ok();
        let out = stdout.take();
        let err = stderr.take();

        let mut problems = Vec::new();
        if !err.is_empty() {
            problems.push(err);
        }
        if !finished {
            tracing::debug!("Pipes of {} still open after exit", self.describe());
            problems.push("output truncated".to_string());
        }
        if terminated_at.is_some() {
            problems.push("command timed out".to_string());
        }
        match status {
            Some(status) => {
                if let Some(code) = status.code() {
                    if code != 0 {
                        problems.push(format!("exitcode: {code}"));
                    }
                } else if let Some(signal) = status.signal() {
                    problems.push(format!("killed by signal {signal}"));
                }
            }
            None => problems.push("lost track of child process".to_string()),
        }

        let outcome = Outcome::new(Output::Text(out), Some(problems.join(" ")));
        match &outcome.error {
            Some(err) => tracing::info!(
                "Problem occured with cmd {}: out {}, err {}",
                self.describe(),
                outcome.output,
                err
            ),
            None => tracing::debug!("cmd {} on localhost: {}", self.describe(), outcome.output),
        }
        outcome
    }
}

impl std::fmt::Debug for LocalCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommand")
            .field("command", &self.describe())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn signal_group(pgid: Option<Pid>, signal: Signal) {
    if let Some(pgid) = pgid {
        if let Err(e) = killpg(pgid, signal) {
            tracing::debug!("Failed to send {signal} to {pgid}: {e}");
        }
    }
}

/// Reads one pipe of the child into a shared buffer.
///
/// A grandchild that inherited the pipe may keep it open long after the
/// child exits; whatever arrived before the caller gives up stays readable.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Drain {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = stream.map(|mut stream| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buffer
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, task }
    }

    /// Resolves once the pipe reaches end of file.
    async fn finish(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
        }
    }

    /// Stop reading and hand back what was read so far.
    fn take(&self) -> String {
        if let Some(task) = &self.task {
            task.abort();
        }
        let bytes = std::mem::take(
            &mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner),
        );
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}
