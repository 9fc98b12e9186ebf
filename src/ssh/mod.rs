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

//! Asynchronous SSH client built on russh.
//!
//! [`Client`] connects, authenticates and executes one command per session
//! channel with an execution timeout that is independent of the connect
//! timeout.

mod authentication;
mod channel;
mod connection;
mod error;

pub use authentication::AuthMethod;
pub use channel::CommandExecutedResult;
pub use connection::{Client, ClientHandler, ServerCheckMethod};
pub use error::Error;
