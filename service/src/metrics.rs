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
//! Lock-free counters for the front-end
//!
//! Every recording method updates an atomic, readable through [`ServerMetrics::snapshot`],
//! and emits the matching `metrics` counter or gauge under `netmush.*` for whatever
//! recorder the binary installs.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Front-end metrics
#[derive(Debug)]
pub struct ServerMetrics {
    // Sessions
    sessions_opened: AtomicU64,
    sessions_active: AtomicU64,
    players: AtomicU64,

    // Throughput
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    commands: AtomicU64,
    http_requests: AtomicU64,

    // Failures
    tls_failures: AtomicU64,
    proxy_rejections: AtomicU64,
    socket_errors: AtomicU64,

    reboots: AtomicU64,
    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// All counters at zero
    pub fn new() -> Self {
        Self {
            sessions_opened: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            players: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            tls_failures: AtomicU64::new(0),
            proxy_rejections: AtomicU64::new(0),
            socket_errors: AtomicU64::new(0),
            reboots: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// A session was admitted
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.sessions.total").increment(1);
        gauge!("netmush.sessions.active").increment(1.0);
    }

    /// A session was torn down
    pub fn session_closed(&self) {
        // saturating: sessions restored after a reboot were never counted as opened
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |active| Some(active.saturating_sub(1)));
        gauge!("netmush.sessions.active").decrement(1.0);
    }

    /// A session came back after a reboot
    pub fn session_restored(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        gauge!("netmush.sessions.active").increment(1.0);
    }

    /// Sessions currently open
    pub fn active_sessions(&self) -> u64 {
        self.sessions_active.load(Ordering::Relaxed)
    }

    /// Sessions admitted since start
    pub fn total_sessions(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Publish the number of logged-in sessions
    pub fn set_players(&self, players: usize) {
        self.players.store(players as u64, Ordering::Relaxed);
        gauge!("netmush.players").set(players as f64);
    }

    /// Logged-in sessions at the last update
    pub fn players(&self) -> u64 {
        self.players.load(Ordering::Relaxed)
    }

    /// Bytes read from clients
    pub fn bytes_received(&self, count: u64) {
        if count > 0 {
            self.bytes_in.fetch_add(count, Ordering::Relaxed);
            counter!("netmush.bytes.received").increment(count);
        }
    }

    /// Bytes written to clients
    pub fn bytes_sent(&self, count: u64) {
        if count > 0 {
            self.bytes_out.fetch_add(count, Ordering::Relaxed);
            counter!("netmush.bytes.sent").increment(count);
        }
    }

    /// A command line was executed
    pub fn command_executed(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.commands").increment(1);
    }

    /// An HTTP request was answered
    pub fn http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.http.requests").increment(1);
    }

    /// A TLS accept or handshake failed
    pub fn tls_failure(&self) {
        self.tls_failures.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.tls.failures").increment(1);
    }

    /// A local connection failed the trust check or sent no preamble
    pub fn proxy_rejected(&self) {
        self.proxy_rejections.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.proxy.rejected").increment(1);
    }

    /// A session hit a socket error
    pub fn socket_error(&self) {
        self.socket_errors.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.sessions.socket_errors").increment(1);
    }

    /// A reboot was performed
    pub fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::Relaxed);
        counter!("netmush.reboots").increment(1);
    }

    /// Get a point-in-time view of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            players: self.players.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            tls_failures: self.tls_failures.load(Ordering::Relaxed),
            proxy_rejections: self.proxy_rejections.load(Ordering::Relaxed),
            socket_errors: self.socket_errors.load(Ordering::Relaxed),
            reboots: self.reboots.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Counters at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Sessions admitted since start
    pub sessions_opened: u64,
    /// Sessions open
    pub sessions_active: u64,
    /// Logged-in sessions
    pub players: u64,
    /// Bytes read
    pub bytes_in: u64,
    /// Bytes written
    pub bytes_out: u64,
    /// Commands executed
    pub commands: u64,
    /// HTTP requests answered
    pub http_requests: u64,
    /// TLS failures
    pub tls_failures: u64,
    /// Rejected local connections
    pub proxy_rejections: u64,
    /// Socket errors
    pub socket_errors: u64,
    /// Reboots performed by this image
    pub reboots: u64,
    /// Time since this image started
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Commands per second over the uptime
    pub fn commands_per_sec(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.commands as f64 / self.uptime.as_secs_f64()
    }

    /// Failures of any kind
    pub fn total_errors(&self) -> u64 {
        self.tls_failures + self.proxy_rejections + self.socket_errors
    }
}
