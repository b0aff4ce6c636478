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
//! The event loop.
//!
//! One thread and one `poll(2)` per tick. Every tick computes a wait, polls the listeners,
//! the signal pipe and every session socket, services whatever is ready, fires due timers,
//! refills quotas, runs queued commands and sweeps closed sessions, in that order.
//!
//! # Example
//!
//! ```no_run
//! use netmush_service::{CommandResult, Context, Interpreter, Server, ServiceConfig};
//!
//! struct Echo;
//!
//! impl Interpreter for Echo {
//!     fn welcome(&mut self, cx: &mut Context<'_>) {
//!         cx.session.send_line("Welcome!");
//!     }
//!
//!     fn execute(&mut self, cx: &mut Context<'_>, command: &str) -> CommandResult {
//!         cx.session.send_line(command);
//!         CommandResult::Ok
//!     }
//! }
//!
//! let mut server = Server::bind(ServiceConfig::new(), Echo)?;
//! server.run()?;
//! # Ok::<(), netmush_service::NetError>(())
//! ```

use crate::commands::{self, Builtin, PUEBLO_HELLO};
use crate::config::{GreetingMode, ServiceConfig};
use crate::error::{NetError, Result};
use crate::interpreter::{CommandResult, Context, DisconnectNotice, Interpreter, ServerStatus};
use crate::metrics::ServerMetrics;
use crate::offload::{OffloadCommand, OffloadSupervisor};
use crate::proxy::{PREAMBLE_TIMEOUT, TrustPolicy, peer_credentials, read_preamble};
use crate::quota::QuotaBucket;
use crate::reboot::{self, RebootRecord, RecordFeatures};
use crate::session::{InputContext, Session, SessionEvent, SessionSettings, unix_time};
use crate::signals::{ServerHandle, SignalPipe, Wake};
use crate::table::SessionTable;
use crate::timer::{TimerKind, TimerQueue};
use crate::tls::{self, TlsState, TlsStream};
use crate::transport::Transport;
use crate::types::{ConnFlags, SessionId, ShutdownReason, TransportKind};
use netmush_telnetcodec::{
    CharsetHandler, GmcpHandler, LinemodeHandler, MsspHandler, NawsHandler, OptionTable, SuppressGoAheadHandler,
    TerminalTypeHandler,
};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use rustls::ServerConfig;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Delay before the telnet probe, and again before the banner, in probe mode
const PROBE_DELAY: Duration = Duration::from_secs(1);

/// Read buffer size
const READ_CHUNK: usize = 8192;

/// What the caller of [`Server::tick`] should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep ticking
    Continue,
    /// An orderly shutdown was requested
    Shutdown,
    /// A hot reboot was requested
    Reboot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Listener,
    LocalListener,
    TlsListener,
    Signals,
    Session(SessionId),
}

/// The whole front-end: listeners, sessions, timers and the interpreter behind them
pub struct Server<I: Interpreter> {
    config: ServiceConfig,
    interpreter: I,
    listener: Option<TcpListener>,
    local_listener: Option<UnixListener>,
    local_path: Option<PathBuf>,
    tls_listener: Option<TcpListener>,
    tls_config: Option<Arc<ServerConfig>>,
    options: OptionTable,
    settings: SessionSettings,
    sessions: SessionTable,
    timers: TimerQueue,
    http_quota: QuotaBucket,
    signals: SignalPipe,
    offload: Option<OffloadSupervisor>,
    trust: TrustPolicy,
    metrics: Arc<ServerMetrics>,
    status: ServerStatus,
    last_refill: Instant,
    read_buf: Box<[u8]>,
}

impl<I: Interpreter> std::fmt::Debug for Server<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("sessions", &self.sessions.len())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<I: Interpreter> Server<I> {
    /// Bind the configured listeners, or take over the ones a reboot left behind when a
    /// reboot record exists.
    pub fn bind(config: ServiceConfig, interpreter: I) -> Result<Self> {
        config.validate()?;
        match RebootRecord::load(&config.reboot_file)? {
            Some(record) => Self::resume(config, interpreter, record),
            None => Self::start(config, interpreter),
        }
    }

    fn start(config: ServiceConfig, interpreter: I) -> Result<Self> {
        let listener = config.bind_address.map(TcpListener::bind).transpose()?;
        let local_listener = config.local_socket.as_deref().map(bind_local).transpose()?;
        let in_process_tls = config.tls.address.filter(|_| !config.offload.enabled);
        let tls_listener = in_process_tls.map(TcpListener::bind).transpose()?;
        for listener in listener.iter().chain(tls_listener.iter()) {
            listener.set_nonblocking(true)?;
        }
        if let Some(local) = &local_listener {
            local.set_nonblocking(true)?;
        }
        let mut server = Self::assemble(config, interpreter, listener, local_listener, tls_listener, unix_time(), 0)?;
        if let Some(offload) = server.offload.as_mut() {
            offload.start()?;
            server.trust.set_proxy_pid(offload.pid());
        }
        info!(
            address = ?server.local_addr(),
            tls = ?server.tls_local_addr(),
            local = ?server.local_path,
            "Listening"
        );
        Ok(server)
    }

    fn resume(config: ServiceConfig, interpreter: I, record: RebootRecord) -> Result<Self> {
        info!(sessions = record.sessions.len(), reboot_count = record.reboot_count, "Resuming after reboot");
        // SAFETY: the descriptors were written by the previous image, survived execv with
        // FD_CLOEXEC cleared and are owned by nothing else in this process.
        let listener = inherited(record.listener).map(|fd| unsafe { TcpListener::from_raw_fd(fd) });
        let local_listener = inherited(record.local_listener).map(|fd| unsafe { UnixListener::from_raw_fd(fd) });
        let tls_listener = inherited(record.tls_listener).map(|fd| unsafe { TcpListener::from_raw_fd(fd) });
        for listener in listener.iter().chain(tls_listener.iter()) {
            listener.set_nonblocking(true)?;
        }
        if let Some(local) = &local_listener {
            local.set_nonblocking(true)?;
        }
        let mut server = Self::assemble(
            config,
            interpreter,
            listener,
            local_listener,
            tls_listener,
            record.first_start,
            record.reboot_count.saturating_add(1),
        )?;
        server.metrics.reboot();

        for saved in record.sessions {
            let fd = saved.fd;
            if !reboot::fd_is_open(fd) {
                warn!(fd, ip = %saved.ip, "Descriptor from reboot record is closed");
                continue;
            }
            // SAFETY: as above, one record per descriptor.
            let transport = match saved.kind {
                TransportKind::PlainIp => Transport::Tcp(unsafe { TcpStream::from_raw_fd(fd) }),
                TransportKind::TlsProxy | TransportKind::LocalSocket => {
                    Transport::Unix(unsafe { UnixStream::from_raw_fd(fd) })
                }
                TransportKind::TlsIp => {
                    warn!(fd, ip = %saved.ip, "In-process TLS session cannot survive a reboot");
                    drop(unsafe { TcpStream::from_raw_fd(fd) });
                    continue;
                }
            };
            if let Err(err) = set_nonblocking(&transport) {
                warn!(fd, %err, "Unable to restore descriptor");
                continue;
            }
            let closing = ConnFlags::from_bits(saved.flags).contains(ConnFlags::CLOSE_READY);
            let id = server.sessions.allocate_id();
            let mut session = Session::restore(id, saved, transport, &server.settings);
            server.metrics.session_restored();
            if closing {
                let notice = session.close(ShutdownReason::Disconnect);
                server.metrics.session_closed();
                server.interpreter.disconnected(&notice);
                continue;
            }
            debug!(session = %id, fd, "{} Reattached", session.tag());
            let mut cx = Context {
                session: &mut session,
                others: &mut server.sessions,
                status: &server.status,
            };
            server.interpreter.reattached(&mut cx);
            server.sessions.insert(session);
        }

        if let Some(offload) = server.offload.as_mut() {
            let adopted = record.offload_pid.is_some_and(|pid| offload.adopt(pid));
            if !adopted {
                offload.start()?;
            }
            server.trust.set_proxy_pid(offload.pid());
        }
        server.after_sweep();
        Ok(server)
    }

    fn assemble(
        config: ServiceConfig,
        interpreter: I,
        listener: Option<TcpListener>,
        local_listener: Option<UnixListener>,
        tls_listener: Option<TcpListener>,
        first_start: i64,
        reboot_count: u32,
    ) -> Result<Self> {
        let tls_config = match (&tls_listener, &config.tls.cert_file, &config.tls.key_file) {
            (Some(_), Some(cert), Some(key)) => Some(tls::server_config(
                cert,
                key,
                config.tls.ca_file.as_deref(),
                config.tls.require_client_cert,
            )?),
            (Some(_), _, _) => return Err(NetError::Config("TLS listener without certificate".into())),
            _ => None,
        };
        let offload = if config.offload.enabled {
            Some(OffloadSupervisor::new(OffloadCommand::from_config(&config)?))
        } else {
            None
        };
        let signals = SignalPipe::new()?;
        signals.install()?;
        let metrics = Arc::new(ServerMetrics::new());
        let status = ServerStatus {
            name: config.mud_name.clone(),
            url: config.mud_url.clone(),
            version: env!("CARGO_PKG_VERSION"),
            first_start,
            reboot_count,
            sessions: 0,
            players: 0,
            port: listener
                .as_ref()
                .and_then(|listener| listener.local_addr().ok())
                .map(|addr| addr.port()),
            tls_port: config.tls.address.map(|addr| addr.port()),
            pueblo: config.pueblo,
        };
        let options = option_table(status.clone(), config.mssp.clone(), Arc::clone(&metrics));
        Ok(Self {
            settings: SessionSettings::from_config(&config),
            http_quota: QuotaBucket::new(&config.http_quota),
            trust: TrustPolicy::new(config.allow_foreign_local),
            local_path: local_listener.as_ref().and(config.local_socket.clone()),
            interpreter,
            listener,
            local_listener,
            tls_listener,
            tls_config,
            options,
            sessions: SessionTable::new(),
            timers: TimerQueue::new(),
            signals,
            offload,
            metrics,
            status,
            last_refill: Instant::now(),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            config,
        })
    }

    /// Address of the plaintext listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    /// Address of the in-process TLS listener
    pub fn tls_local_addr(&self) -> Option<SocketAddr> {
        self.tls_listener.as_ref().and_then(|listener| listener.local_addr().ok())
    }

    /// Path of the local socket
    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    /// A handle other threads can use to stop, reboot or wake the loop
    pub fn handle(&self) -> ServerHandle {
        self.signals.handle()
    }

    /// Trust local connections from `pid` as the TLS proxy, for a proxy managed outside this
    /// process. A supervised offload process replaces it whenever it is restarted.
    pub fn trust_proxy_pid(&mut self, pid: i32) {
        self.trust.set_proxy_pid(Some(pid));
    }

    /// Counters
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Server-wide facts as of the last tick
    pub fn status(&self) -> &ServerStatus {
        &self.status
    }

    /// The configuration in use
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Every live session
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Every live session, mutably
    pub fn sessions_mut(&mut self) -> &mut SessionTable {
        &mut self.sessions
    }

    /// The interpreter
    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    /// The interpreter, mutably
    pub fn interpreter_mut(&mut self) -> &mut I {
        &mut self.interpreter
    }

    /// Tick until shutdown. A reboot only returns here when `execv` failed.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.tick()? {
                Control::Continue => {}
                Control::Shutdown => {
                    self.shutdown();
                    return Ok(());
                }
                Control::Reboot => {
                    if let Err(err) = self.reboot() {
                        error!(%err, "Reboot failed");
                        self.abandon_reboot();
                    }
                }
            }
        }
    }

    /// One pass of the loop
    pub fn tick(&mut self) -> Result<Control> {
        let now = Instant::now();
        let timeout = self.poll_timeout(now);
        let ready = self.wait(timeout)?;

        let mut control = Control::Continue;
        let now = Instant::now();
        for (source, revents) in ready {
            match source {
                Source::Listener => self.accept_tcp(false, now),
                Source::TlsListener => self.accept_tcp(true, now),
                Source::LocalListener => self.accept_local(now),
                Source::Signals => {
                    for wake in self.signals.drain() {
                        match wake {
                            Wake::Shutdown => control = Control::Shutdown,
                            Wake::Reboot if control == Control::Continue => control = Control::Reboot,
                            Wake::Reboot | Wake::Poke => {}
                            Wake::Child => self.reap(now),
                        }
                    }
                }
                Source::Session(id) => self.service_session(id, revents, now),
            }
        }
        self.reap(now);
        self.fire_timers(now);
        self.refill(now);
        self.execute_pass();
        self.interpreter.run_tasks(&mut self.sessions, &self.status, now);
        self.sweep();
        Ok(control)
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        let mut timeout = self.config.poll_ceiling();
        let mut bound = |limit: Option<Duration>| {
            if let Some(limit) = limit {
                timeout = timeout.min(limit);
            }
        };
        bound(self.interpreter.next_task(now));
        bound(self.timers.next_timeout(now));
        for session in self.sessions.iter() {
            if session.has_pending_line() {
                bound(Some(session.quota().until_next_unit().unwrap_or(Duration::ZERO)));
            }
            if session.http_ready() {
                bound(Some(self.http_quota.until_next_unit().unwrap_or(Duration::ZERO)));
            }
        }
        timeout
    }

    fn wait(&self, timeout: Duration) -> Result<Vec<(Source, PollFlags)>> {
        let admitting = self.sessions.len() < self.config.max_sessions;
        let mut sources = Vec::with_capacity(self.sessions.len() + 4);
        let mut fds = Vec::with_capacity(self.sessions.len() + 4);

        sources.push(Source::Signals);
        fds.push(PollFd::new(self.signals.as_fd(), PollFlags::POLLIN));
        if admitting {
            if let Some(listener) = &self.listener {
                sources.push(Source::Listener);
                fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
            }
            if let Some(listener) = &self.tls_listener {
                sources.push(Source::TlsListener);
                fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
            }
            if let Some(listener) = &self.local_listener {
                sources.push(Source::LocalListener);
                fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
            }
        }
        for session in self.sessions.iter() {
            let mut interest = PollFlags::empty();
            if session.wants_read() {
                interest |= PollFlags::POLLIN;
            }
            if session.wants_write() {
                interest |= PollFlags::POLLOUT;
            }
            if !interest.is_empty() {
                sources.push(Source::Session(session.id()));
                fds.push(PollFd::new(session.transport().as_fd(), interest));
            }
        }

        let wait = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        trace!(fds = fds.len(), wait, "Polling");
        match poll(&mut fds, PollTimeout::from(wait)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(errno) => {
                error!(%errno, "poll failed");
                return Err(errno.into());
            }
        }
        Ok(sources
            .into_iter()
            .zip(fds.iter())
            .filter_map(|(source, fd)| fd.revents().filter(|revents| !revents.is_empty()).map(|r| (source, r)))
            .collect())
    }

    fn accept_tcp(&mut self, secure: bool, now: Instant) {
        while self.sessions.len() < self.config.max_sessions {
            let listener = if secure { &self.tls_listener } else { &self.listener };
            let Some(listener) = listener else {
                return;
            };
            let (stream, addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "accept failed");
                    return;
                }
            };
            if let Err(err) = stream.set_nonblocking(true) {
                warn!(%err, "Unable to make socket non-blocking");
                continue;
            }
            let _ = stream.set_nodelay(true);
            let ip = addr.ip().to_canonical().to_string();
            let (transport, kind) = match (&self.tls_config, secure) {
                (Some(config), true) => (
                    Transport::Tls(Box::new(TlsStream::new(stream, Arc::clone(config)))),
                    TransportKind::TlsIp,
                ),
                _ => (Transport::Tcp(stream), TransportKind::PlainIp),
            };
            self.open_session(transport, kind, ip.clone(), ip, Vec::new(), now);
        }
    }

    fn accept_local(&mut self, now: Instant) {
        while self.sessions.len() < self.config.max_sessions {
            let Some(listener) = &self.local_listener else {
                return;
            };
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "Local accept failed");
                    return;
                }
            };
            if let Err(err) = stream.set_nonblocking(true) {
                warn!(%err, "Unable to make local socket non-blocking");
                continue;
            }
            let kind = match self.trust.authorize(peer_credentials(&stream)) {
                Ok(kind) => kind,
                Err(_) => {
                    self.metrics.proxy_rejected();
                    continue;
                }
            };
            let (host, ip, initial) = if kind == TransportKind::TlsProxy {
                match read_preamble(&stream, PREAMBLE_TIMEOUT) {
                    Ok((preamble, extra)) => (preamble.host, preamble.ip, extra),
                    Err(err) => {
                        warn!(%err, fd = stream.as_raw_fd(), "Closing local connection without preamble");
                        self.metrics.proxy_rejected();
                        continue;
                    }
                }
            } else {
                ("localhost".to_string(), "127.0.0.1".to_string(), Vec::new())
            };
            self.open_session(Transport::Unix(stream), kind, host, ip, initial, now);
        }
    }

    fn open_session(
        &mut self,
        transport: Transport,
        kind: TransportKind,
        host: String,
        ip: String,
        initial: Vec<u8>,
        now: Instant,
    ) {
        let id = self.sessions.allocate_id();
        let mut session = Session::new(id, transport, kind, host, ip, &self.settings);
        info!(
            session = %id,
            fd = session.fd(),
            ip = session.ip(),
            "{} Connection opened from {}",
            session.tag(),
            kind.source()
        );
        self.metrics.session_opened();

        if kind == TransportKind::TlsIp {
            let deadline = self.config.tls.handshake_timeout();
            session.handshake_timer = Some(self.timers.schedule(id, TimerKind::TlsHandshake, now, deadline));
        }
        match self.config.greeting {
            GreetingMode::Immediate => {
                session.send_offers(&self.options);
                self.welcome(&mut session);
            }
            GreetingMode::Probe => {
                session.conn_timer = Some(self.timers.schedule(id, TimerKind::TelnetProbe, now, PROBE_DELAY));
            }
        }
        if !initial.is_empty() {
            let mut events = Vec::new();
            let cx = InputContext {
                options: &self.options,
                websocket_url: &self.config.websocket_url,
            };
            session.receive(&initial, &cx, &mut events);
            self.handle_events(&mut session, events, now);
        }
        self.sessions.insert(session);
        self.refresh_status();
    }

    fn service_session(&mut self, id: SessionId, revents: PollFlags, now: Instant) {
        let Some(mut session) = self.sessions.take(id) else {
            return;
        };
        if revents.contains(PollFlags::POLLNVAL) {
            session.mark_for_shutdown(ShutdownReason::SocketError);
            self.sessions.restore(session);
            return;
        }
        let readable = revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR);
        let writable = revents.contains(PollFlags::POLLOUT);
        let tls_state = session.transport().tls_state();
        let write_on_read = tls_state.is_some_and(|state| state.contains(TlsState::WRITE_ON_READ));
        let read_on_write = tls_state.is_some_and(|state| state.contains(TlsState::READ_ON_WRITE));

        let mut events = Vec::new();
        if (readable && (session.wants_read() || !revents.contains(PollFlags::POLLIN))) || (writable && write_on_read)
        {
            let cx = InputContext {
                options: &self.options,
                websocket_url: &self.config.websocket_url,
            };
            let report = session.read_ready(&cx, &mut self.read_buf);
            self.metrics.bytes_received(report.bytes as u64);
            events = report.events;
        }
        if writable || (readable && read_on_write) {
            let written = session.flush();
            self.metrics.bytes_sent(written as u64);
        }
        if session.handshake_timer.is_some() && session.transport().is_established() {
            session.handshake_timer = None;
        }
        self.handle_events(&mut session, events, now);
        self.sessions.restore(session);
    }

    fn handle_events(&mut self, session: &mut Session, events: Vec<SessionEvent>, now: Instant) {
        for event in events {
            match event {
                SessionEvent::HttpActivity => {
                    let delay = self.config.http_timeout();
                    session.conn_timer = Some(self.timers.schedule(session.id(), TimerKind::HttpFallback, now, delay));
                }
                SessionEvent::WebSocketOpened => {
                    session.conn_timer = None;
                    self.welcome(session);
                }
                SessionEvent::Gmcp(message) => {
                    let mut cx = Context {
                        session: &mut *session,
                        others: &mut self.sessions,
                        status: &self.status,
                    };
                    self.interpreter.gmcp(&mut cx, &message);
                }
            }
        }
    }

    fn welcome(&mut self, session: &mut Session) {
        if self.config.pueblo && !session.flags().contains(ConnFlags::HTML) {
            session.send(PUEBLO_HELLO);
        }
        let mut cx = Context {
            session,
            others: &mut self.sessions,
            status: &self.status,
        };
        self.interpreter.welcome(&mut cx);
    }

    fn fire_timers(&mut self, now: Instant) {
        for expired in self.timers.expired(now) {
            let Some(mut session) = self.sessions.take(expired.session) else {
                continue;
            };
            let token = Some(expired.token);
            match expired.kind {
                TimerKind::TelnetProbe if session.conn_timer == token => {
                    if !session.flags().contains(ConnFlags::TELNET) {
                        session.send_probe();
                    }
                    session.conn_timer =
                        Some(self.timers.schedule(session.id(), TimerKind::Welcome, now, PROBE_DELAY));
                }
                TimerKind::Welcome if session.conn_timer == token => {
                    session.conn_timer = None;
                    self.welcome(&mut session);
                }
                TimerKind::HttpFallback if session.conn_timer == token => {
                    session.conn_timer = None;
                    let mut events = Vec::new();
                    let cx = InputContext {
                        options: &self.options,
                        websocket_url: &self.config.websocket_url,
                    };
                    if session.http_timeout(&cx, &mut events) {
                        let delay = self.config.http_timeout();
                        session.conn_timer =
                            Some(self.timers.schedule(session.id(), TimerKind::HttpFallback, now, delay));
                    }
                    self.handle_events(&mut session, events, now);
                }
                TimerKind::TlsHandshake if session.handshake_timer == token => {
                    session.handshake_timer = None;
                    if !session.transport().is_established() {
                        info!(session = %session.id(), "{} TLS handshake timed out", session.tag());
                        session.mark_for_shutdown(ShutdownReason::HandshakeTimeout);
                    }
                }
                kind => trace!(session = %session.id(), ?kind, "Stale timer"),
            }
            self.sessions.restore(session);
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = u64::try_from(now.saturating_duration_since(self.last_refill).as_millis()).unwrap_or(u64::MAX);
        if elapsed == 0 {
            return;
        }
        self.last_refill += Duration::from_millis(elapsed);
        self.http_quota.refill(elapsed);
        for session in self.sessions.iter_mut() {
            session.quota_mut().refill(elapsed);
        }
    }

    /// Run one queued line per eligible session, round after round, until none qualifies
    fn execute_pass(&mut self) {
        self.refresh_status();
        loop {
            let mut progressed = false;
            for id in self.sessions.ids() {
                let Some(mut session) = self.sessions.take(id) else {
                    continue;
                };
                progressed |= self.execute_one(&mut session);
                self.sessions.restore(session);
            }
            if !progressed {
                break;
            }
        }
    }

    fn execute_one(&mut self, session: &mut Session) -> bool {
        if session.shutdown_reason().is_some() {
            return false;
        }
        if session.http_ready() {
            if !self.http_quota.try_take() {
                return false;
            }
            session.begin_http();
            self.metrics.http_request();
            if self.interpreter.serves_http() {
                let mut cx = Context {
                    session: &mut *session,
                    others: &mut self.sessions,
                    status: &self.status,
                };
                let found = self.interpreter.http_request(&mut cx);
                session.finish_http(found);
            } else {
                session.redirect_http(&self.config.mud_url);
            }
            return true;
        }
        if !session.has_pending_line() || !session.quota_mut().try_take() {
            return false;
        }
        let Some(line) = session.pop_line() else {
            return false;
        };
        if session.conn_timer.take().is_some() {
            self.welcome(session);
        }
        let result = self.execute_line(session, &line);
        self.apply_result(session, result);
        true
    }

    fn execute_line(&mut self, session: &mut Session, line: &str) -> CommandResult {
        let interpreter = &self.interpreter;
        match commands::dispatch(session, line, &self.status, &self.config.mssp, || interpreter.info()) {
            Builtin::Done(result) => result,
            Builtin::Welcome => {
                self.welcome(session);
                CommandResult::Ok
            }
            Builtin::Forward => {
                self.metrics.command_executed();
                let wrap = session.is_connected();
                if wrap && let Some(prefix) = session.prefix().map(str::to_string) {
                    session.send_line(&prefix);
                }
                let mut cx = Context {
                    session: &mut *session,
                    others: &mut self.sessions,
                    status: &self.status,
                };
                let result = self.interpreter.execute(&mut cx, line);
                if wrap && let Some(suffix) = session.suffix().map(str::to_string) {
                    session.send_line(&suffix);
                }
                result
            }
        }
    }

    fn apply_result(&mut self, session: &mut Session, result: CommandResult) {
        match result {
            CommandResult::Ok => {}
            CommandResult::Quit => session.mark_for_shutdown(ShutdownReason::Quit),
            CommandResult::Logout => {
                if session.is_connected() {
                    let mut cx = Context {
                        session: &mut *session,
                        others: &mut self.sessions,
                        status: &self.status,
                    };
                    self.interpreter.logout(&mut cx);
                    session.reset_for_logout();
                    self.welcome(session);
                }
            }
            CommandResult::RejectSite => session.mark_for_shutdown(ShutdownReason::Sitelocked),
            CommandResult::ForceDisconnect => session.mark_for_shutdown(ShutdownReason::Booted),
        }
    }

    fn sweep(&mut self) {
        for notice in self.sessions.sweep() {
            self.closed(&notice);
        }
        self.after_sweep();
    }

    fn closed(&mut self, notice: &DisconnectNotice) {
        self.metrics.session_closed();
        match notice.reason {
            ShutdownReason::TlsFailure | ShutdownReason::HandshakeTimeout => self.metrics.tls_failure(),
            ShutdownReason::SocketError => self.metrics.socket_error(),
            _ => {}
        }
        self.interpreter.disconnected(notice);
    }

    fn after_sweep(&mut self) {
        self.metrics.set_players(self.sessions.connected_count());
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        self.status.sessions = self.sessions.len();
        self.status.players = self.sessions.connected_count();
    }

    fn reap(&mut self, now: Instant) {
        if let Some(offload) = self.offload.as_mut() {
            if offload.reap(now) {
                self.trust.set_proxy_pid(offload.pid());
            }
        }
    }

    /// Tell every session, close them all and stop the offload subprocess
    pub fn shutdown(&mut self) {
        info!(sessions = self.sessions.len(), "Shutting down");
        self.interpreter.shutdown(&mut self.sessions);
        for session in self.sessions.iter_mut() {
            session.send_line("Going down - Bye");
            session.mark_for_shutdown(ShutdownReason::Shutdown);
        }
        self.sweep();
        if let Some(offload) = self.offload.as_mut() {
            offload.stop();
        }
        if let Some(path) = self.local_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Save every session, keep the sockets open across `execv` and run the binary again.
    /// Only returns on failure.
    pub fn reboot(&mut self) -> Result<Infallible> {
        self.save_for_reboot()?;
        reboot::exec_self()
    }

    /// Close the sessions that cannot survive a reboot, clear `FD_CLOEXEC` on every socket
    /// that can and write the reboot record. A server bound afterwards with the same
    /// configuration resumes those sessions.
    pub fn save_for_reboot(&mut self) -> Result<RebootRecord> {
        info!(sessions = self.sessions.len(), "Reboot requested");
        for session in self.sessions.iter_mut() {
            if session.kind() == TransportKind::TlsIp || session.flags().contains(ConnFlags::HTTP_REQUEST) {
                session.send_line("Rebooting. Please reconnect.");
                session.mark_for_shutdown(ShutdownReason::Reboot);
            }
        }
        self.sweep();

        let listener = self.listener.as_ref().map_or(-1, AsRawFd::as_raw_fd);
        let local_listener = self.local_listener.as_ref().map_or(-1, AsRawFd::as_raw_fd);
        let tls_listener = self.tls_listener.as_ref().map_or(-1, AsRawFd::as_raw_fd);
        let mut fds: Vec<RawFd> = [listener, local_listener, tls_listener].into_iter().filter(|fd| *fd >= 0).collect();
        let mut sessions = Vec::with_capacity(self.sessions.len());
        for session in self.sessions.iter_mut() {
            session.flush();
            fds.push(session.fd());
            sessions.push(session.to_record());
        }
        for fd in &fds {
            reboot::clear_cloexec(*fd)?;
        }
        let record = RebootRecord {
            features: RecordFeatures::CURRENT,
            listener,
            local_listener,
            tls_listener,
            max_fd: fds.iter().copied().max().unwrap_or(-1),
            sessions,
            first_start: self.status.first_start,
            reboot_count: self.status.reboot_count,
            offload_pid: self.offload.as_mut().and_then(OffloadSupervisor::release),
        };
        record.save(&self.config.reboot_file)?;
        Ok(record)
    }

    fn abandon_reboot(&mut self) {
        let _ = std::fs::remove_file(&self.config.reboot_file);
        if let (Some(offload), Some(pid)) = (self.offload.as_mut(), self.trust.proxy_pid()) {
            offload.adopt(pid);
        }
    }
}

fn bind_local(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

fn inherited(fd: RawFd) -> Option<RawFd> {
    (fd >= 0 && reboot::fd_is_open(fd)).then_some(fd)
}

fn set_nonblocking(transport: &Transport) -> io::Result<()> {
    match transport {
        Transport::Tcp(stream) => stream.set_nonblocking(true),
        Transport::Unix(stream) => stream.set_nonblocking(true),
        Transport::Tls(stream) => stream.get_ref().set_nonblocking(true),
    }
}

/// The telnet options every session negotiates, with MSSP answered from live counters
fn option_table(status: ServerStatus, extra: BTreeMap<String, String>, metrics: Arc<ServerMetrics>) -> OptionTable {
    let mssp = MsspHandler::new(move || {
        let mut status = status.clone();
        status.sessions = usize::try_from(metrics.active_sessions()).unwrap_or(usize::MAX);
        status.players = usize::try_from(metrics.players()).unwrap_or(usize::MAX);
        commands::mud_server_status(&status, &extra)
    });
    OptionTable::builder()
        .handler(SuppressGoAheadHandler)
        .handler(TerminalTypeHandler)
        .handler(NawsHandler)
        .handler(LinemodeHandler)
        .handler(CharsetHandler::default())
        .handler(mssp)
        .handler(GmcpHandler)
        .build()
}
