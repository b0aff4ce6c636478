//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! Network front-end for a persistent multi-user text server
//!
//! The crate accepts plaintext, TLS and local-socket clients, speaks telnet, a small HTTP
//! subset and WebSocket to them, and hands complete command lines to an [`Interpreter`].
//! Everything runs on one thread around one `poll(2)` per tick:
//!
//! ```text
//! Server
//!     ↓
//! SessionTable → Session → Transport (TCP | Unix | TLS)
//!     ↓
//! Interpreter
//! ```
//!
//! A hot reboot writes every session to a record file, clears `FD_CLOEXEC` on the
//! sockets and re-executes the binary, which picks the sessions up again. TLS can be
//! terminated in-process or by the `netmush-sslproxy` subprocess, which relays clients
//! over the local socket behind an `"<ip>^<host>\r\n"` preamble.
//!
//! # Example
//!
//! ```no_run
//! use netmush_service::{CommandResult, Context, Interpreter, Server, ServiceConfig};
//!
//! struct Greeter;
//!
//! impl Interpreter for Greeter {
//!     fn welcome(&mut self, cx: &mut Context<'_>) {
//!         cx.session.send_line("Hello. Type QUIT to leave.");
//!     }
//!
//!     fn execute(&mut self, cx: &mut Context<'_>, command: &str) -> CommandResult {
//!         cx.session.send_line(&format!("You said: {command}"));
//!         CommandResult::Ok
//!     }
//! }
//!
//! fn main() -> netmush_service::Result<()> {
//!     let config = ServiceConfig::new().with_bind_address("0.0.0.0:4201".parse().unwrap());
//!     Server::bind(config, Greeter)?.run()
//! }
//! ```

mod commands;
mod config;
mod error;
mod http;
mod input;
mod interpreter;
mod metrics;
mod offload;
mod output;
mod proxy;
mod quota;
mod reboot;
mod server;
mod session;
mod signals;
mod table;
mod text;
mod timer;
mod tls;
mod transport;
mod types;
mod websocket;

pub use commands::{INFO_VERSION, PUEBLO_HELLO};
pub use config::{DEFAULT_TTYPE, GreetingMode, OffloadConfig, QuotaConfig, ServiceConfig, TlsConfig};
pub use error::{NetError, Result};
pub use http::{HttpError, HttpMethod, HttpPhase, HttpRequest, HttpResponse};
pub use interpreter::{CommandResult, Context, DisconnectNotice, Interpreter, ServerStatus};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use offload::{OffloadCommand, OffloadSupervisor};
pub use proxy::{PREAMBLE_TIMEOUT, PeerCredentials, Preamble, PreambleParse, TrustPolicy, parse_preamble};
pub use quota::QuotaBucket;
pub use reboot::{NO_SESSION_FLAG, RebootRecord, RecordFeatures, SessionRecord};
pub use server::{Control, Server};
pub use session::{AYT_REPLY, Session, UTF8_ERROR};
pub use signals::ServerHandle;
pub use table::SessionTable;
pub use tls::{TlsState, TlsStream};
pub use transport::Transport;
pub use types::{ConnFlags, PlayerRef, SessionId, ShutdownReason, TransportKind};
pub use websocket::Channel;
