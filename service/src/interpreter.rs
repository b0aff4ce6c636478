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
//! The boundary between the network layer and the command interpreter.
//!
//! The server owns the sockets and hands each complete command line to an [`Interpreter`]
//! together with a [`Context`]: the session that sent it, every other session, and a status
//! snapshot. The interpreter answers with a [`CommandResult`] and may queue output on any
//! session it can reach.

use crate::session::Session;
use crate::table::SessionTable;
use crate::types::{PlayerRef, SessionId, ShutdownReason, TransportKind};
use netmush_telnetcodec::gmcp::GmcpMessage;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// What the server does after a command ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandResult {
    /// Keep going
    Ok,
    /// Close with reason "quit"
    Quit,
    /// Return to the connect screen
    Logout,
    /// Close with reason "sitelocked"
    RejectSite,
    /// Close with reason "booted"
    ForceDisconnect,
}

/// Sent to the interpreter once for every session that goes away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectNotice {
    /// The session
    pub session: SessionId,
    /// Its socket, already closed
    pub fd: RawFd,
    /// Remote address
    pub ip: String,
    /// Remote host name
    pub host: String,
    /// How it connected
    pub kind: TransportKind,
    /// Why it closed
    pub reason: ShutdownReason,
    /// Identity, when it had logged in
    pub player: Option<PlayerRef>,
    /// Bytes received
    pub bytes_in: u64,
    /// Bytes sent
    pub bytes_out: u64,
    /// Commands executed
    pub cmds: u32,
    /// Connection-log id assigned by the interpreter
    pub conn_log_id: i64,
}

/// A snapshot of server-wide facts for INFO, MSSP and the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Game name
    pub name: String,
    /// Game web site
    pub url: String,
    /// Crate version
    pub version: &'static str,
    /// Unix time of the first start, preserved across reboots
    pub first_start: i64,
    /// Completed reboots
    pub reboot_count: u32,
    /// Open sessions
    pub sessions: usize,
    /// Sessions with an identity
    pub players: usize,
    /// Plaintext port
    pub port: Option<u16>,
    /// TLS port
    pub tls_port: Option<u16>,
    /// Pueblo support
    pub pueblo: bool,
}

/// What an interpreter call can reach.
///
/// The calling session is taken out of the table for the duration of the call, so
/// `session` and `others` never alias.
#[derive(Debug)]
pub struct Context<'a> {
    /// The session the call is about
    pub session: &'a mut Session,
    /// Every other session
    pub others: &'a mut SessionTable,
    /// Server-wide facts
    pub status: &'a ServerStatus,
}

/// The command interpreter behind the network layer.
///
/// Only [`welcome`](Interpreter::welcome) and [`execute`](Interpreter::execute) are required.
pub trait Interpreter {
    /// Send the connect screen to a session that has not logged in
    fn welcome(&mut self, cx: &mut Context<'_>);

    /// Run one command line
    fn execute(&mut self, cx: &mut Context<'_>, command: &str) -> CommandResult;

    /// The session logged out; its identity is still set
    fn logout(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// A session went away
    fn disconnected(&mut self, notice: &DisconnectNotice) {
        let _ = notice;
    }

    /// A session was rebuilt after a reboot
    fn reattached(&mut self, cx: &mut Context<'_>) {
        let _ = cx;
    }

    /// True when [`http_request`](Interpreter::http_request) serves any route.
    /// Without routes every HTTP request is redirected to the game's URL.
    fn serves_http(&self) -> bool {
        false
    }

    /// Answer the session's completed HTTP request by filling its response.
    /// Returns false when no route matches.
    fn http_request(&mut self, cx: &mut Context<'_>) -> bool {
        let _ = cx;
        false
    }

    /// A GMCP message the network layer does not answer itself
    fn gmcp(&mut self, cx: &mut Context<'_>, message: &GmcpMessage) {
        let _ = (cx, message);
    }

    /// Extra lines for the INFO command
    fn info(&self) -> Vec<String> {
        Vec::new()
    }

    /// Time until the next scheduled task, bounding the poll wait
    fn next_task(&self, now: Instant) -> Option<Duration> {
        let _ = now;
        None
    }

    /// Run whatever scheduled work is due
    fn run_tasks(&mut self, sessions: &mut SessionTable, status: &ServerStatus, now: Instant) {
        let _ = (sessions, status, now);
    }

    /// The server is about to shut down
    fn shutdown(&mut self, sessions: &mut SessionTable) {
        let _ = sessions;
    }
}
