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
//! One client connection: transport, protocol state, input lines and queued output.
//!
//! A session starts out undecided. The first bytes are held back until they either look
//! like an HTTP request line or clearly do not; a telnet command at any point commits the
//! session to telnet. HTTP sessions may upgrade to WebSocket. Everything the interpreter
//! writes goes through [`Session::send`], which applies the session's encoding and framing.

use crate::config::{DEFAULT_TTYPE, QuotaConfig, ServiceConfig};
use crate::http::{HttpMethod, HttpPhase, HttpRequest, HttpResponse};
use crate::input::LineAssembler;
use crate::interpreter::DisconnectNotice;
use crate::output::OutputQueue;
use crate::quota::QuotaBucket;
use crate::reboot::SessionRecord;
use crate::text::{self, TextEncoding};
use crate::timer::TimerToken;
use crate::transport::Transport;
use crate::types::{ConnFlags, PlayerRef, SessionId, ShutdownReason, TransportKind};
use crate::websocket::{self, Channel, FrameDecoder, FrameEvent};
use bytes::{BufMut, Bytes, BytesMut};
use netmush_telnetcodec::charset::CharsetChoice;
use netmush_telnetcodec::gmcp::GmcpMessage;
use netmush_telnetcodec::{
    NegotiatedOptions, Negotiation, OptionTable, Request, TelnetCodec, TelnetEvent, TelnetFrame, TelnetOption,
    consts, escape_iac,
};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::codec::Decoder;
use tracing::{debug, info, trace};

/// Answer to `IAC AYT`
pub const AYT_REPLY: &[u8] = b"\r\n*** AYT received, I'm here ***\r\n";

/// Sent when a UTF-8 session submits a line that is not UTF-8
pub const UTF8_ERROR: &str = "ERROR: Invalid UTF-8 sequence.\r\n";

/// Default screen width
pub const DEFAULT_WIDTH: u16 = 78;

/// Default screen height
pub const DEFAULT_HEIGHT: u16 = 24;

/// Most bytes held back while deciding between HTTP and telnet
const MAX_SNIFF: usize = 4096;

/// Current Unix time in seconds
pub(crate) fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

/// Per-session limits taken from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionSettings {
    pub quota: QuotaConfig,
    pub max_output: usize,
}

impl SessionSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            quota: config.command_quota,
            max_output: config.max_output,
        }
    }
}

/// Shared, read-only state input processing needs
#[derive(Debug, Clone, Copy)]
pub(crate) struct InputContext<'a> {
    pub options: &'a OptionTable,
    pub websocket_url: &'a str,
}

/// Something the server must act on after input was processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    /// HTTP bytes arrived; restart the fallback timer
    HttpActivity,
    /// The session upgraded to WebSocket and needs its welcome
    WebSocketOpened,
    /// A GMCP message for the interpreter
    Gmcp(GmcpMessage),
}

/// Outcome of one readiness notification
#[derive(Debug, Default)]
pub(crate) struct ReadReport {
    pub bytes: usize,
    pub events: Vec<SessionEvent>,
}

enum Sniff {
    Undecided,
    Telnet,
    Http(usize),
}

fn sniff(buf: &[u8]) -> Sniff {
    match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(end) if HttpRequest::looks_like_request(&buf[..end]) => {
            if buf[end] == b'\r' && end + 1 == buf.len() {
                // the LF may still be on its way
                Sniff::Undecided
            } else {
                Sniff::Http(end)
            }
        }
        Some(_) => Sniff::Telnet,
        None if buf.len() < MAX_SNIFF && HttpMethod::could_start_line(buf) => Sniff::Undecided,
        None => Sniff::Telnet,
    }
}

///
/// A connected client.
///
/// Owned by the [`SessionTable`](crate::SessionTable); the interpreter reaches sessions
/// through a [`Context`](crate::Context).
///
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    transport: Transport,
    kind: TransportKind,
    flags: ConnFlags,
    shutdown: Option<ShutdownReason>,
    player: Option<PlayerRef>,
    hidden: bool,
    codec: TelnetCodec,
    negotiated_do: NegotiatedOptions,
    negotiated_will: NegotiatedOptions,
    assembler: LineAssembler,
    sniff: Option<Vec<u8>>,
    lines: VecDeque<String>,
    output: OutputQueue,
    quota: QuotaBucket,
    width: u16,
    height: u16,
    ttype: Cow<'static, str>,
    prefix: Option<String>,
    suffix: Option<String>,
    host: String,
    ip: String,
    connected_at: i64,
    last_time: i64,
    cmds: u32,
    bytes_in: u64,
    bytes_out: u64,
    checksum: String,
    conn_log_id: i64,
    http: Option<HttpRequest>,
    frames: Option<FrameDecoder>,
    pub(crate) conn_timer: Option<TimerToken>,
    pub(crate) handshake_timer: Option<TimerToken>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        transport: Transport,
        kind: TransportKind,
        host: String,
        ip: String,
        settings: &SessionSettings,
    ) -> Self {
        let now = unix_time();
        Self {
            id,
            transport,
            kind,
            flags: ConnFlags::PROMPT_NEWLINES | ConnFlags::AWAITING_FIRST_DATA,
            shutdown: None,
            player: None,
            hidden: false,
            codec: TelnetCodec::new(),
            negotiated_do: NegotiatedOptions::default(),
            negotiated_will: NegotiatedOptions::default(),
            assembler: LineAssembler::new(),
            sniff: Some(Vec::new()),
            lines: VecDeque::new(),
            output: OutputQueue::new(settings.max_output),
            quota: QuotaBucket::new(&settings.quota),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            ttype: Cow::Borrowed(DEFAULT_TTYPE),
            prefix: None,
            suffix: None,
            host,
            ip,
            connected_at: now,
            last_time: now,
            cmds: 0,
            bytes_in: 0,
            bytes_out: 0,
            checksum: String::new(),
            conn_log_id: 0,
            http: None,
            frames: None,
            conn_timer: None,
            handshake_timer: None,
        }
    }

    /// Rebuild a session from its reboot record around the inherited socket
    pub(crate) fn restore(id: SessionId, record: SessionRecord, transport: Transport, settings: &SessionSettings) -> Self {
        let flags = ConnFlags::from_bits(record.flags);
        let mut session = Self::new(id, transport, record.kind, record.host, record.ip, settings);
        session.sniff = None;
        session.flags = flags;
        session.connected_at = record.connected_at;
        session.last_time = record.last_time;
        session.hidden = record.hidden;
        session.cmds = record.cmds;
        session.player = record.player.map(PlayerRef::new);
        session.prefix = record.prefix;
        session.suffix = record.suffix;
        session.width = record.width;
        session.height = record.height;
        session.ttype = record.ttype.map_or(Cow::Borrowed(DEFAULT_TTYPE), Cow::Owned);
        session.checksum = record.checksum;
        session.conn_log_id = record.conn_log_id;
        if flags.contains(ConnFlags::WEBSOCKETS) {
            session.frames = Some(FrameDecoder::new());
        }
        session
    }

    /// The reboot record for this session
    pub(crate) fn to_record(&self) -> SessionRecord {
        SessionRecord {
            fd: self.fd(),
            connected_at: self.connected_at,
            hidden: self.hidden,
            cmds: self.cmds,
            player: self.player.map(|player| player.as_i64()),
            last_time: self.last_time,
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
            host: self.host.clone(),
            ip: self.ip.clone(),
            flags: self.flags.bits(),
            width: self.width,
            height: self.height,
            ttype: match &self.ttype {
                Cow::Borrowed(_) => None,
                Cow::Owned(name) => Some(name.clone()),
            },
            kind: self.kind,
            checksum: self.checksum.clone(),
            conn_log_id: self.conn_log_id,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The socket descriptor
    pub fn fd(&self) -> RawFd {
        self.transport.raw_fd()
    }

    /// How the session reached the server
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Connection flags
    pub fn flags(&self) -> ConnFlags {
        self.flags
    }

    /// Remote address
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Remote host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The authenticated identity
    pub fn player(&self) -> Option<PlayerRef> {
        self.player
    }

    /// Attach or clear the authenticated identity
    pub fn set_player(&mut self, player: Option<PlayerRef>) {
        self.player = player;
    }

    /// True once an identity is attached
    pub fn is_connected(&self) -> bool {
        self.player.is_some()
    }

    /// Hidden from WHO lists
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Hide or reveal the session
    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Screen width
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Screen height
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Terminal type reported by the client, or `"unknown"`
    pub fn terminal_type(&self) -> &str {
        &self.ttype
    }

    /// Output prefix
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Output suffix
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Unix time the connection opened
    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    /// Unix time of the last command
    pub fn last_time(&self) -> i64 {
        self.last_time
    }

    /// Commands executed
    pub fn cmds(&self) -> u32 {
        self.cmds
    }

    /// Bytes received
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Bytes sent
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Pueblo client checksum
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Connection-log id
    pub fn conn_log_id(&self) -> i64 {
        self.conn_log_id
    }

    /// Record the interpreter's connection-log id
    pub fn set_conn_log_id(&mut self, id: i64) {
        self.conn_log_id = id;
    }

    /// Bytes waiting to be written
    pub fn pending_output(&self) -> usize {
        self.output.pending()
    }

    /// Why the session is closing, once it is
    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shutdown
    }

    /// Close the session at the next sweep. The first reason wins.
    pub fn mark_for_shutdown(&mut self, reason: ShutdownReason) {
        if self.shutdown.is_none() {
            trace!(session = %self.id, %reason, "Marked for shutdown");
            self.shutdown = Some(reason);
        }
    }

    /// The HTTP request being answered, if the session is in HTTP mode
    pub fn http_request(&self) -> Option<&HttpRequest> {
        self.http.as_ref()
    }

    /// The HTTP response under construction
    pub fn http_response_mut(&mut self) -> Option<&mut HttpResponse> {
        self.http.as_mut().map(HttpRequest::response_mut)
    }

    /// `[fd/host/ip]`, the connection log prefix
    pub fn tag(&self) -> String {
        format!("[{}/{}/{}]", self.fd(), self.host, self.ip)
    }

    fn encoding(&self) -> TextEncoding {
        if self.flags.contains(ConnFlags::UTF8) {
            TextEncoding::Utf8
        } else if self.flags.contains(ConnFlags::STRIP_ACCENTS) {
            TextEncoding::Ascii
        } else {
            TextEncoding::Latin1
        }
    }

    /// Queue text for the client.
    ///
    /// The text is encoded for the session, IAC-escaped on telnet sessions and framed on
    /// WebSocket sessions. During an HTTP exchange it becomes part of the response body.
    pub fn send(&mut self, text: &str) {
        self.send_on(Channel::Text, text);
    }

    /// Queue text followed by a line ending
    pub fn send_line(&mut self, text: &str) {
        let mut line = String::with_capacity(text.len() + 2);
        line.push_str(text);
        line.push_str("\r\n");
        self.send(&line);
    }

    /// Queue text on a WebSocket channel. Other sessions receive it as plain text.
    pub fn send_on(&mut self, channel: Channel, text: &str) {
        if let Some(request) = self.http.as_mut() {
            request.response_mut().write(text.as_bytes());
            return;
        }
        let mut bytes = Vec::with_capacity(text.len());
        text::encode_text(text, self.encoding(), &mut bytes);
        self.queue_payload(channel, &bytes);
    }

    /// Queue a prompt: a go-ahead on telnet sessions, a newline when the client asked for
    /// prompt newlines, or a prompt frame on WebSocket sessions.
    pub fn send_prompt(&mut self, text: &str) {
        if self.flags.contains(ConnFlags::WEBSOCKETS) {
            self.send_on(Channel::Prompt, text);
            return;
        }
        self.send(text);
        if self.flags.contains(ConnFlags::PROMPT_NEWLINES) {
            self.queue_bytes(Bytes::from_static(b"\r\n"));
        } else if self.flags.contains(ConnFlags::TELNET) {
            self.queue_bytes(Bytes::from_static(&[consts::IAC, consts::GA]));
        }
    }

    /// Send a GMCP message if the client negotiated GMCP
    pub fn send_gmcp(&mut self, package: &str, data: Option<&str>) {
        if !self.flags.contains(ConnFlags::GMCP) {
            return;
        }
        let payload = GmcpMessage::new(package, data).encode();
        let mut out = BytesMut::with_capacity(payload.len() + 6);
        out.put_slice(&[consts::IAC, consts::SB, TelnetOption::GMCP.to_u8()]);
        escape_iac(&payload, &mut out);
        out.put_slice(&[consts::IAC, consts::SE]);
        self.queue_bytes(out.freeze());
    }

    fn queue_payload(&mut self, channel: Channel, bytes: &[u8]) {
        if self.flags.contains(ConnFlags::WEBSOCKETS) {
            let mut frame = BytesMut::with_capacity(bytes.len() + 11);
            websocket::encode_frame(channel, bytes, &mut frame);
            self.queue_bytes(frame.freeze());
        } else if self.flags.contains(ConnFlags::TELNET) {
            let mut escaped = BytesMut::with_capacity(bytes.len());
            escape_iac(bytes, &mut escaped);
            self.queue_bytes(escaped.freeze());
        } else {
            self.queue_bytes(Bytes::copy_from_slice(bytes));
        }
    }

    /// Queue bytes exactly as given
    pub(crate) fn queue_bytes(&mut self, bytes: impl Into<Bytes>) {
        if !self.flags.contains(ConnFlags::NO_WRITES) {
            self.output.push(bytes);
        }
    }

    pub(crate) fn set_flag(&mut self, flag: ConnFlags, value: bool) {
        self.flags.set(flag, value);
    }

    /// Set an output prefix; empty clears it
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = Some(prefix.to_string()).filter(|prefix| !prefix.is_empty());
    }

    /// Set an output suffix; empty clears it
    pub fn set_suffix(&mut self, suffix: &str) {
        self.suffix = Some(suffix.to_string()).filter(|suffix| !suffix.is_empty());
    }

    pub(crate) fn set_width(&mut self, width: u16) {
        self.width = width;
    }

    pub(crate) fn set_height(&mut self, height: u16) {
        self.height = height;
    }

    pub(crate) fn set_checksum(&mut self, checksum: String) {
        self.checksum = checksum;
    }

    /// Note a command for idle tracking
    pub(crate) fn touch(&mut self) {
        self.last_time = unix_time();
        self.cmds = self.cmds.saturating_add(1);
    }

    /// Return to the connect screen
    pub(crate) fn reset_for_logout(&mut self) {
        self.player = None;
        self.prefix = None;
        self.suffix = None;
        self.hidden = false;
        self.cmds = 0;
        self.lines.clear();
        self.assembler.clear();
        self.quota.reset();
    }

    pub(crate) fn has_pending_line(&self) -> bool {
        !self.lines.is_empty()
    }

    pub(crate) fn pop_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    pub(crate) fn quota_mut(&mut self) -> &mut QuotaBucket {
        &mut self.quota
    }

    pub(crate) fn quota(&self) -> &QuotaBucket {
        &self.quota
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    /// True while the session should be polled for input
    pub(crate) fn wants_read(&self) -> bool {
        if self.shutdown.is_some() || self.flags.contains(ConnFlags::HTTP_CLOSE) {
            return self.transport.wants_read_for_write();
        }
        self.lines.is_empty() || self.transport.wants_read_for_write()
    }

    /// True while the session has something to write
    pub(crate) fn wants_write(&self) -> bool {
        (!self.output.is_empty() && self.transport.is_established()) || self.transport.wants_write()
    }

    /// Read once (or until drained, for TLS) and process what arrived
    pub(crate) fn read_ready(&mut self, cx: &InputContext<'_>, buf: &mut [u8]) -> ReadReport {
        let mut report = ReadReport::default();
        loop {
            match self.transport.read(buf) {
                Ok(0) => {
                    debug!(session = %self.id, "Peer closed connection");
                    self.mark_for_shutdown(ShutdownReason::Disconnect);
                    break;
                }
                Ok(count) => {
                    report.bytes += count;
                    self.bytes_in += count as u64;
                    self.receive(&buf[..count], cx, &mut report.events);
                    if !matches!(self.transport, Transport::Tls(_)) {
                        break;
                    }
                }
                Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => break,
                Err(err) => {
                    let reason = if self.kind == TransportKind::TlsIp
                        && (!self.transport.is_established() || err.kind() == io::ErrorKind::InvalidData)
                    {
                        ShutdownReason::TlsFailure
                    } else {
                        ShutdownReason::SocketError
                    };
                    debug!(session = %self.id, %err, %reason, "Read failed");
                    self.fail_socket(reason);
                    break;
                }
            }
        }
        report
    }

    /// Write as much queued output as the socket takes. Returns the bytes written.
    pub(crate) fn flush(&mut self) -> usize {
        let mut written = 0;
        while !self.flags.contains(ConnFlags::SOCKET_ERROR) {
            if self.output.is_empty() {
                if let Err(err) = self.transport.flush_records() {
                    if err.kind() != io::ErrorKind::WouldBlock {
                        debug!(session = %self.id, %err, "Flush failed");
                        self.fail_socket(ShutdownReason::SocketError);
                    }
                }
                break;
            }
            let result = {
                let slices = self.output.io_slices();
                self.transport.write_vectored(&slices)
            };
            match result {
                Ok(0) => break,
                Ok(count) => {
                    self.output.consume(count);
                    written += count;
                }
                Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => break,
                Err(err) => {
                    debug!(session = %self.id, %err, "Write failed");
                    self.fail_socket(ShutdownReason::SocketError);
                }
            }
        }
        self.bytes_out += written as u64;
        written
    }

    fn fail_socket(&mut self, reason: ShutdownReason) {
        self.flags.insert(ConnFlags::SOCKET_ERROR | ConnFlags::NO_WRITES);
        self.output.clear();
        self.mark_for_shutdown(reason);
    }

    /// Process received bytes
    pub(crate) fn receive(&mut self, data: &[u8], cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        if self.shutdown.is_some() || self.flags.contains(ConnFlags::HTTP_CLOSE) {
            return;
        }
        if self.flags.contains(ConnFlags::WEBSOCKETS) {
            self.websocket_input(data);
        } else if self.http.is_some() {
            self.http_input(data, cx, events);
        } else if let Some(mut held) = self.sniff.take() {
            held.extend_from_slice(data);
            match sniff(&held) {
                Sniff::Undecided => self.sniff = Some(held),
                Sniff::Telnet => self.telnet_input(&held, cx, events),
                Sniff::Http(end) => {
                    self.flags.remove(ConnFlags::AWAITING_FIRST_DATA);
                    self.start_http(&held, end, cx, events);
                }
            }
        } else {
            self.telnet_input(data, cx, events);
        }
    }

    fn start_http(&mut self, held: &[u8], end: usize, cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        let line: String = held[..end].iter().copied().map(char::from).collect();
        let mut rest = end + 1;
        if held[end] == b'\r' && held.get(rest) == Some(&b'\n') {
            rest += 1;
        }
        match HttpRequest::parse_request_line(&line) {
            Err(err) => {
                debug!(session = %self.id, %err, "Rejected HTTP request line");
                self.fail_http(err.response());
            }
            Ok(request) => {
                debug!(session = %self.id, method = %request.method(), route = request.route(), "HTTP request");
                self.flags.insert(ConnFlags::HTTP_REQUEST);
                if websocket::is_upgrade_request(&request, cx.websocket_url) {
                    self.flags.insert(ConnFlags::WEBSOCKETS_REQUEST);
                }
                self.http = Some(request);
                events.push(SessionEvent::HttpActivity);
                self.http_input(&held[rest..], cx, events);
            }
        }
    }

    fn http_input(&mut self, data: &[u8], cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        let Some(request) = self.http.as_mut() else {
            return;
        };
        let was_done = request.is_done();
        let result = request.feed(data);
        match result {
            Err(err) => {
                debug!(session = %self.id, %err, "Rejected HTTP request");
                self.fail_http(err.response());
            }
            Ok(HttpPhase::Done) if !was_done => {
                events.push(SessionEvent::HttpActivity);
                self.http_complete(cx, events);
            }
            Ok(_) => {
                if !data.is_empty() {
                    events.push(SessionEvent::HttpActivity);
                }
            }
        }
    }

    fn http_complete(&mut self, cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        if self.flags.contains(ConnFlags::WEBSOCKETS_REQUEST) {
            self.upgrade_websocket(cx, events);
        } else {
            self.flags.insert(ConnFlags::HTTP_READY);
        }
    }

    fn upgrade_websocket(&mut self, cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        let Some(mut request) = self.http.take() else {
            return;
        };
        self.flags.remove(ConnFlags::WEBSOCKETS_REQUEST | ConnFlags::HTTP_REQUEST);
        match websocket::handshake(&request) {
            Ok(reply) => {
                self.queue_bytes(reply);
                self.flags.remove(ConnFlags::PROMPT_NEWLINES | ConnFlags::AWAITING_FIRST_DATA);
                self.flags.insert(ConnFlags::WEBSOCKETS | ConnFlags::UTF8);
                self.frames = Some(FrameDecoder::new());
                info!(session = %self.id, url = cx.websocket_url, "{} Switching to WebSocket mode.", self.tag());
                events.push(SessionEvent::WebSocketOpened);
                let excess = request.take_excess();
                if !excess.is_empty() {
                    self.websocket_input(&excess);
                }
            }
            Err(reply) => {
                debug!(session = %self.id, "Refused WebSocket upgrade");
                self.queue_bytes(reply);
                self.flags.insert(ConnFlags::HTTP_CLOSE);
            }
        }
    }

    fn fail_http(&mut self, response: HttpResponse) {
        self.http = None;
        self.queue_bytes(response.to_bytes());
        self.flags
            .remove(ConnFlags::HTTP_REQUEST | ConnFlags::HTTP_READY | ConnFlags::WEBSOCKETS_REQUEST);
        self.flags.insert(ConnFlags::HTTP_CLOSE);
    }

    /// True when a completed request waits for the execution pass
    pub(crate) fn http_ready(&self) -> bool {
        self.flags.contains(ConnFlags::HTTP_READY) && self.http.is_some()
    }

    /// The execution pass picked the request up
    pub(crate) fn begin_http(&mut self) {
        self.flags.remove(ConnFlags::HTTP_READY);
    }

    /// Send the interpreter's response, or a 404 when no route matched, and close
    pub(crate) fn finish_http(&mut self, found: bool) {
        let Some(request) = self.http.take() else {
            return;
        };
        let response = if found {
            request.response().to_bytes()
        } else {
            HttpResponse::page("404 Not Found", &format!("File not found. \"{}\"", request.route())).to_bytes()
        };
        self.flags.remove(ConnFlags::HTTP_REQUEST | ConnFlags::HTTP_READY);
        self.queue_bytes(response);
        self.flags.insert(ConnFlags::HTTP_CLOSE);
    }

    /// Answer an HTTP request when the interpreter serves no routes
    pub(crate) fn redirect_http(&mut self, url: &str) {
        let mut response = HttpResponse::page("301 Moved Permanently", "Moved to MUDURL.");
        if url.starts_with("http") {
            response.add_header("Location", url);
        }
        self.fail_http(response);
    }

    /// The HTTP fallback timer fired. Returns true when it should be armed again.
    pub(crate) fn http_timeout(&mut self, cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) -> bool {
        match self.http.as_mut() {
            Some(request) if !request.is_done() => {
                request.finish();
                self.http_complete(cx, events);
                self.http.is_some()
            }
            Some(_) => {
                debug!(session = %self.id, "HTTP request timed out");
                self.fail_http(HttpResponse::page("408 Request Timeout", "Unable to complete request."));
                false
            }
            None => false,
        }
    }

    fn websocket_input(&mut self, data: &[u8]) {
        let Some(decoder) = self.frames.as_mut() else {
            return;
        };
        for event in decoder.decode(data) {
            match event {
                FrameEvent::Input(bytes) => self.assemble(&bytes),
                FrameEvent::Ping(payload) => {
                    let mut pong = BytesMut::new();
                    websocket::encode_pong(&payload, &mut pong);
                    self.queue_bytes(pong.freeze());
                }
                FrameEvent::Close => {
                    let mut close = BytesMut::new();
                    websocket::encode_close(&mut close);
                    self.queue_bytes(close.freeze());
                    self.mark_for_shutdown(ShutdownReason::Disconnect);
                    break;
                }
            }
        }
    }

    fn assemble(&mut self, bytes: &[u8]) {
        let utf8 = self.flags.contains(ConnFlags::UTF8);
        for &byte in bytes {
            if let Some(line) = self.assembler.push(byte, utf8) {
                self.accept_line(line);
            }
        }
    }

    fn accept_line(&mut self, line: Vec<u8>) {
        let encoding = if self.flags.contains(ConnFlags::UTF8) {
            TextEncoding::Utf8
        } else {
            TextEncoding::Latin1
        };
        match text::decode_line(line, encoding) {
            Some(line) => self.lines.push_back(line),
            None => self.send(UTF8_ERROR),
        }
    }

    fn telnet_input(&mut self, data: &[u8], cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        if !self.flags.intersects(ConnFlags::TELNET | ConnFlags::TELNET_QUERY | ConnFlags::AWAITING_FIRST_DATA) {
            let utf8 = self.flags.contains(ConnFlags::UTF8);
            for &byte in data {
                if let Some(line) = self.assembler.push(byte, utf8) {
                    self.accept_line(line);
                }
            }
            return;
        }
        let mut src = BytesMut::from(data);
        loop {
            match self.codec.decode(&mut src) {
                Ok(Some(frame)) => self.telnet_frame(frame, cx, events),
                Ok(None) => break,
                Err(err) => {
                    debug!(session = %self.id, %err, "Telnet decode error");
                    break;
                }
            }
        }
        self.flags.remove(ConnFlags::AWAITING_FIRST_DATA);
    }

    fn telnet_frame(&mut self, frame: TelnetFrame, cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        match frame {
            TelnetFrame::Data(byte) | TelnetFrame::Invalid(byte) => {
                let utf8 = self.flags.contains(ConnFlags::UTF8);
                if let Some(line) = self.assembler.push(byte, utf8) {
                    self.accept_line(line);
                }
            }
            TelnetFrame::AreYouThere => {
                self.setup_telnet(cx);
                self.queue_bytes(Bytes::from_static(AYT_REPLY));
            }
            TelnetFrame::EraseCharacter => {
                self.setup_telnet(cx);
                self.assembler.erase_char();
            }
            TelnetFrame::EraseLine => {
                self.setup_telnet(cx);
                self.assembler.erase_line();
            }
            TelnetFrame::NoOperation | TelnetFrame::Command(_) | TelnetFrame::Dont(_) | TelnetFrame::Wont(_) => {
                self.setup_telnet(cx);
            }
            TelnetFrame::Do(option) => self.negotiate(Request::Do, option, cx, events),
            TelnetFrame::Will(option) => self.negotiate(Request::Will, option, cx, events),
            TelnetFrame::Subnegotiate(option, payload) => {
                self.setup_telnet(cx);
                let mut reply = BytesMut::new();
                match cx.options.subnegotiate(option, payload, &mut reply) {
                    Ok(Some(event)) => self.apply(event, events),
                    Ok(None) => {}
                    Err(err) => debug!(session = %self.id, %option, %err, "Bad subnegotiation"),
                }
                self.queue_bytes(reply.freeze());
            }
        }
    }

    fn negotiate(&mut self, request: Request, option: TelnetOption, cx: &InputContext<'_>, events: &mut Vec<SessionEvent>) {
        self.setup_telnet(cx);
        let first = match request {
            Request::Do => self.negotiated_do.mark(option),
            Request::Will => self.negotiated_will.mark(option),
        };
        if !first {
            trace!(session = %self.id, %option, ?request, "Repeated negotiation ignored");
            return;
        }
        let mut reply = BytesMut::new();
        let outcome = cx.options.negotiate(request, option, &mut reply);
        self.queue_bytes(reply.freeze());
        if let Negotiation::Handled(Some(event)) = outcome {
            self.apply(event, events);
        }
    }

    /// Commit to telnet. The cached offers go out the first time only.
    fn setup_telnet(&mut self, cx: &InputContext<'_>) {
        if !self.flags.contains(ConnFlags::TELNET) {
            self.flags.insert(ConnFlags::TELNET);
            self.sniff = None;
            info!(session = %self.id, "{} Switching to Telnet mode.", self.tag());
        }
        if !self.flags.contains(ConnFlags::OFFERS_SENT) {
            self.send_offers(cx.options);
        }
        self.flags.remove(ConnFlags::TELNET_QUERY);
    }

    /// Queue the cached offers unless they were already sent
    pub(crate) fn send_offers(&mut self, options: &OptionTable) {
        if self.flags.contains(ConnFlags::OFFERS_SENT) {
            return;
        }
        self.flags.insert(ConnFlags::OFFERS_SENT);
        if !self.flags.contains(ConnFlags::TELNET) {
            self.flags.insert(ConnFlags::TELNET_QUERY);
        }
        self.queue_bytes(options.offers().clone());
    }

    /// Ask whether the client speaks telnet
    pub(crate) fn send_probe(&mut self) {
        self.flags.insert(ConnFlags::TELNET_QUERY);
        self.queue_bytes(Bytes::from_static(&[consts::IAC, consts::DO, consts::option::LINEMODE]));
    }

    fn apply(&mut self, event: TelnetEvent, events: &mut Vec<SessionEvent>) {
        match event {
            TelnetEvent::PromptNewlines => self.flags.insert(ConnFlags::PROMPT_NEWLINES),
            TelnetEvent::TerminalType(name) => {
                debug!(session = %self.id, ttype = %name, "Terminal type");
                self.ttype = Cow::Owned(name);
            }
            TelnetEvent::WindowSize(size) => {
                if size.width > 0 {
                    self.width = size.width;
                }
                if size.height > 0 {
                    self.height = size.height;
                }
            }
            TelnetEvent::Charset(CharsetChoice::Utf8) => {
                self.flags.insert(ConnFlags::UTF8);
                self.flags.remove(ConnFlags::STRIP_ACCENTS);
            }
            TelnetEvent::Charset(CharsetChoice::Ascii) => {
                self.flags.insert(ConnFlags::STRIP_ACCENTS);
                self.flags.remove(ConnFlags::UTF8);
            }
            TelnetEvent::Charset(CharsetChoice::Other(name)) => {
                debug!(session = %self.id, charset = %name, "Keeping native charset");
            }
            TelnetEvent::GmcpEnabled => self.flags.insert(ConnFlags::GMCP),
            TelnetEvent::Gmcp(message) => {
                if message.package().eq_ignore_ascii_case("Core.Ping") {
                    self.send_gmcp("Core.Ping", None);
                } else if message.package().eq_ignore_ascii_case("Core.Hello") {
                    debug!(session = %self.id, data = message.data().unwrap_or(""), "GMCP client hello");
                    events.push(SessionEvent::Gmcp(message));
                } else if !message.package().eq_ignore_ascii_case("Core.KeepAlive") {
                    events.push(SessionEvent::Gmcp(message));
                }
            }
        }
    }

    /// Say goodbye, flush what the socket takes and close it
    pub(crate) fn close(mut self, reason: ShutdownReason) -> DisconnectNotice {
        match self.player {
            Some(player) => info!(
                session = %self.id,
                %reason,
                cmds = self.cmds,
                bytes_in = self.bytes_in,
                bytes_out = self.bytes_out,
                "{} Logout by {} <{}>",
                self.tag(),
                player,
                reason
            ),
            None => info!(
                session = %self.id,
                %reason,
                bytes_in = self.bytes_in,
                bytes_out = self.bytes_out,
                "{} Connection closed, never connected. <{}>",
                self.tag(),
                reason
            ),
        }
        self.send_gmcp("Core.Goodbye", None);
        self.flush();
        self.flags.insert(ConnFlags::NO_WRITES);
        let fd = self.fd();
        self.transport.shutdown();
        DisconnectNotice {
            session: self.id,
            fd,
            ip: self.ip,
            host: self.host,
            kind: self.kind,
            reason,
            player: self.player,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            cmds: self.cmds,
            conn_log_id: self.conn_log_id,
        }
    }

    /// Give up the socket without shutting it down, for a reboot hand-off
    pub(crate) fn into_transport(self) -> Transport {
        self.transport
    }
}
