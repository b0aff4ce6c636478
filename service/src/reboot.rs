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
//! Hot reboot: the session record file and the `execv` hand-off.
//!
//! Before exec every live session is written to a line-oriented record file and the
//! descriptors that must survive have `FD_CLOEXEC` cleared. The new image reads the file,
//! checks that each descriptor is still open and rebuilds the sessions around them.

use crate::error::{NetError, Result};
use crate::types::TransportKind;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Written unquoted for an absent prefix, suffix or terminal type
pub const NOVALUE: &str = "-";

/// Quoted marker for an absent value in records without [`RecordFeatures::BARE_NOVALUE`]
const LEGACY_NOVALUE: &str = "__NONE__";

/// Command line flag telling a re-executed image not to detach again
pub const NO_SESSION_FLAG: &str = "--no-session";

/// Optional sections present in a record file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFeatures(u32);

impl RecordFeatures {
    /// Sessions carry width and height
    pub const SCREENSIZE: RecordFeatures = RecordFeatures(0x1);
    /// Sessions carry a terminal type
    pub const TTYPE: RecordFeatures = RecordFeatures(0x2);
    /// Sessions carry a Pueblo checksum
    pub const PUEBLO_CHECKSUM: RecordFeatures = RecordFeatures(0x4);
    /// Sessions carry their transport kind
    pub const SOCKET_SRC: RecordFeatures = RecordFeatures(0x8);
    /// Sessions carry no "doing" string, and there is no global poll message
    pub const NO_DOING: RecordFeatures = RecordFeatures(0x10);
    /// The local listener descriptor follows the TCP listener
    pub const LOCAL_SOCKET: RecordFeatures = RecordFeatures(0x20);
    /// The offload subprocess PID closes the file
    pub const SSL_SLAVE: RecordFeatures = RecordFeatures(0x40);
    /// The TLS listener descriptor follows the local listener
    pub const SLAVE_FD: RecordFeatures = RecordFeatures(0x80);
    /// Sessions carry a connection-log id
    pub const CONN_LOG: RecordFeatures = RecordFeatures(0x100);
    /// Absent strings are written as a bare [`NOVALUE`] line
    pub const BARE_NOVALUE: RecordFeatures = RecordFeatures(0x200);

    /// Everything this build writes
    pub const CURRENT: RecordFeatures = RecordFeatures(0x3ff);

    /// Wrap raw bits
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set
    pub fn contains(self, other: RecordFeatures) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One session as persisted across exec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// The still-open socket
    pub fd: RawFd,
    /// Unix time the connection opened
    pub connected_at: i64,
    /// Hidden from WHO lists
    pub hidden: bool,
    /// Commands executed
    pub cmds: u32,
    /// Authenticated identity
    pub player: Option<i64>,
    /// Unix time of the last command
    pub last_time: i64,
    /// Output prefix
    pub prefix: Option<String>,
    /// Output suffix
    pub suffix: Option<String>,
    /// Host name
    pub host: String,
    /// Address
    pub ip: String,
    /// [`ConnFlags`](crate::ConnFlags) bits
    pub flags: u32,
    /// Columns
    pub width: u16,
    /// Rows
    pub height: u16,
    /// Terminal type reported by the client
    pub ttype: Option<String>,
    /// How the session reached the server
    pub kind: TransportKind,
    /// Pueblo client checksum
    pub checksum: String,
    /// Connection-log id
    pub conn_log_id: i64,
}

/// Everything the next image needs to resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootRecord {
    /// Sections present
    pub features: RecordFeatures,
    /// TCP listener, or -1
    pub listener: RawFd,
    /// Local socket listener, or -1
    pub local_listener: RawFd,
    /// In-process TLS listener, or -1
    pub tls_listener: RawFd,
    /// Highest descriptor in use
    pub max_fd: RawFd,
    /// Sessions, oldest first
    pub sessions: Vec<SessionRecord>,
    /// Unix time of the first start
    pub first_start: i64,
    /// Completed reboots
    pub reboot_count: u32,
    /// Running offload subprocess
    pub offload_pid: Option<i32>,
}

impl Default for RebootRecord {
    fn default() -> Self {
        Self {
            features: RecordFeatures::CURRENT,
            listener: -1,
            local_listener: -1,
            tls_listener: -1,
            max_fd: -1,
            sessions: Vec::new(),
            first_start: 0,
            reboot_count: 0,
            offload_pid: None,
        }
    }
}

impl RebootRecord {
    /// Write the record in the current format
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "V{}", RecordFeatures::CURRENT.bits())?;
        writeln!(out, "{}", self.listener)?;
        writeln!(out, "{}", self.local_listener)?;
        writeln!(out, "{}", self.tls_listener)?;
        writeln!(out, "{}", self.max_fd)?;
        for session in &self.sessions {
            writeln!(out, "{}", session.fd)?;
            writeln!(out, "{}", session.connected_at)?;
            writeln!(out, "{}", u8::from(session.hidden))?;
            writeln!(out, "{}", session.cmds)?;
            writeln!(out, "{}", session.player.unwrap_or(-1))?;
            writeln!(out, "{}", session.last_time)?;
            writeln!(out, "{}", optional(session.prefix.as_deref()))?;
            writeln!(out, "{}", optional(session.suffix.as_deref()))?;
            writeln!(out, "{}", quote(&session.host))?;
            writeln!(out, "{}", quote(&session.ip))?;
            writeln!(out, "{}", session.flags)?;
            writeln!(out, "{}", session.width)?;
            writeln!(out, "{}", session.height)?;
            writeln!(out, "{}", optional(session.ttype.as_deref()))?;
            writeln!(out, "{}", session.kind.as_u8())?;
            writeln!(out, "{}", quote(&session.checksum))?;
            writeln!(out, "{}", session.conn_log_id)?;
        }
        writeln!(out, "0")?;
        writeln!(out, "{}", self.first_start)?;
        writeln!(out, "{}", self.reboot_count)?;
        writeln!(out, "{}", self.offload_pid.unwrap_or(-1))?;
        Ok(())
    }

    /// Read a record, honoring the feature bits in its header
    pub fn read_from<R: BufRead>(input: R) -> Result<RebootRecord> {
        let mut lines = Lines::new(input);
        let header = lines.next_line()?;
        let features = header
            .strip_prefix('V')
            .and_then(|bits| bits.parse().ok())
            .map(RecordFeatures::from_bits)
            .ok_or_else(|| lines.error("missing version header"))?;

        let mut record = RebootRecord {
            features,
            ..RebootRecord::default()
        };
        record.listener = lines.number()?;
        if features.contains(RecordFeatures::LOCAL_SOCKET) {
            record.local_listener = lines.number()?;
        }
        if features.contains(RecordFeatures::SLAVE_FD) {
            record.tls_listener = lines.number()?;
        }
        record.max_fd = lines.number()?;

        loop {
            let fd: RawFd = lines.number()?;
            if fd == 0 {
                break;
            }
            let connected_at = lines.number()?;
            let hidden = lines.number::<u8>()? != 0;
            let cmds = lines.number()?;
            let player = Some(lines.number::<i64>()?).filter(|player| *player >= 0);
            let last_time = lines.number()?;
            let prefix = lines.optional_string(features)?;
            let suffix = lines.optional_string(features)?;
            let host = lines.string()?;
            let ip = lines.string()?;
            let flags = lines.number()?;
            if !features.contains(RecordFeatures::NO_DOING) {
                lines.string()?;
            }
            let (width, height) = if features.contains(RecordFeatures::SCREENSIZE) {
                (lines.number()?, lines.number()?)
            } else {
                (78, 24)
            };
            let ttype = if features.contains(RecordFeatures::TTYPE) {
                lines.optional_string(features)?
            } else {
                None
            };
            let kind = if features.contains(RecordFeatures::SOCKET_SRC) {
                let raw = lines.number()?;
                TransportKind::from_u8(raw).ok_or_else(|| lines.error("unknown transport kind"))?
            } else {
                TransportKind::PlainIp
            };
            let checksum = if features.contains(RecordFeatures::PUEBLO_CHECKSUM) {
                lines.string()?
            } else {
                String::new()
            };
            let conn_log_id = if features.contains(RecordFeatures::CONN_LOG) {
                lines.number()?
            } else {
                0
            };
            record.sessions.push(SessionRecord {
                fd,
                connected_at,
                hidden,
                cmds,
                player,
                last_time,
                prefix,
                suffix,
                host,
                ip,
                flags,
                width,
                height,
                ttype,
                kind,
                checksum,
                conn_log_id,
            });
        }

        if !features.contains(RecordFeatures::NO_DOING) {
            lines.string()?;
        }
        record.first_start = lines.number()?;
        record.reboot_count = lines.number()?;
        if features.contains(RecordFeatures::SSL_SLAVE) {
            record.offload_pid = Some(lines.number::<i32>()?).filter(|pid| *pid > 0);
        }
        Ok(record)
    }

    /// Write the record to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        debug!(path = %path.display(), sessions = self.sessions.len(), "Reboot record written");
        Ok(())
    }

    /// Read and delete the record at `path`. A missing file means a cold start.
    pub fn load(path: &Path) -> Result<Option<RebootRecord>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = RebootRecord::read_from(BufReader::new(file));
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), %err, "Unable to remove reboot record");
        }
        record.map(Some)
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn optional(value: Option<&str>) -> String {
    value.map_or_else(|| NOVALUE.to_string(), quote)
}

fn unquote(line: &str) -> Option<String> {
    let inner = line.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            other => out.push(other),
        }
    }
    Some(out)
}

struct Lines<R> {
    input: R,
    line: usize,
    buf: String,
}

impl<R: BufRead> Lines<R> {
    fn new(input: R) -> Self {
        Self {
            input,
            line: 0,
            buf: String::new(),
        }
    }

    fn error(&self, reason: &str) -> NetError {
        NetError::Reboot {
            line: self.line,
            reason: reason.to_string(),
        }
    }

    fn next_line(&mut self) -> Result<String> {
        self.buf.clear();
        self.line += 1;
        if self.input.read_line(&mut self.buf)? == 0 {
            return Err(self.error("unexpected end of file"));
        }
        Ok(self.buf.trim_end_matches(['\r', '\n']).to_string())
    }

    fn number<T: std::str::FromStr>(&mut self) -> Result<T> {
        let line = self.next_line()?;
        line.trim().parse().map_err(|_| self.error("expected a number"))
    }

    fn string(&mut self) -> Result<String> {
        let line = self.next_line()?;
        unquote(&line).ok_or_else(|| self.error("expected a quoted string"))
    }

    fn optional_string(&mut self, features: RecordFeatures) -> Result<Option<String>> {
        if !features.contains(RecordFeatures::BARE_NOVALUE) {
            let value = self.string()?;
            return Ok(Some(value).filter(|value| value != LEGACY_NOVALUE));
        }
        let line = self.next_line()?;
        if line == NOVALUE {
            return Ok(None);
        }
        unquote(&line).map(Some).ok_or_else(|| self.error("expected a quoted string"))
    }
}

/// Let `fd` survive `execv`
pub fn clear_cloexec(fd: RawFd) -> Result<()> {
    let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    fcntl(fd, FcntlArg::F_SETFD(flags - FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// True when `fd` is an open descriptor
pub fn fd_is_open(fd: RawFd) -> bool {
    fd >= 0 && fcntl(fd, FcntlArg::F_GETFD).is_ok()
}

/// Replace the process image with the running binary, passing the original arguments plus
/// [`NO_SESSION_FLAG`]. Returns only on failure.
pub fn exec_self() -> Result<Infallible> {
    let exe = std::env::current_exe()?;
    let mut args: Vec<OsString> = std::env::args_os().collect();
    if !args.iter().any(|arg| arg.as_os_str() == NO_SESSION_FLAG) {
        args.push(OsString::from(NO_SESSION_FLAG));
    }
    let path = CString::new(exe.as_os_str().as_bytes()).map_err(|err| NetError::Config(err.to_string()))?;
    let argv = args
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| NetError::Config(err.to_string()))?;
    info!(binary = %exe.display(), "Re-executing for reboot");
    Ok(nix::unistd::execv(&path, &argv)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample() -> RebootRecord {
        RebootRecord {
            features: RecordFeatures::CURRENT,
            listener: 3,
            local_listener: 4,
            tls_listener: -1,
            max_fd: 9,
            sessions: vec![
                SessionRecord {
                    fd: 7,
                    connected_at: 1_700_000_000,
                    hidden: true,
                    cmds: 42,
                    player: Some(1234),
                    last_time: 1_700_000_500,
                    prefix: Some("<<\"start\">>".to_string()),
                    suffix: None,
                    host: "client.example.com".to_string(),
                    ip: "203.0.113.7".to_string(),
                    flags: 0x0809,
                    width: 132,
                    height: 50,
                    ttype: Some("xterm-256color".to_string()),
                    kind: TransportKind::TlsProxy,
                    checksum: "abc\\def\nghi".to_string(),
                    conn_log_id: 88,
                },
                SessionRecord {
                    fd: 8,
                    connected_at: 1_700_000_100,
                    hidden: false,
                    cmds: 0,
                    player: None,
                    last_time: 1_700_000_100,
                    prefix: None,
                    suffix: Some(String::new()),
                    host: "198.51.100.1".to_string(),
                    ip: "198.51.100.1".to_string(),
                    flags: 0,
                    width: 78,
                    height: 24,
                    ttype: None,
                    kind: TransportKind::PlainIp,
                    checksum: String::new(),
                    conn_log_id: 0,
                },
            ],
            first_start: 1_690_000_000,
            reboot_count: 3,
            offload_pid: Some(4321),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let record = sample();
        let mut out = Vec::new();
        record.write_to(&mut out).unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with("V1023\n3\n4\n-1\n9\n7\n"));
        assert!(text.contains("\n-\n"));
        assert!(!text.contains("__NONE__"));

        let parsed = RebootRecord::read_from(Cursor::new(out)).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_marker_text_is_not_absent() {
        let mut record = sample();
        record.sessions[0].prefix = Some(LEGACY_NOVALUE.to_string());
        record.sessions[0].suffix = Some(NOVALUE.to_string());
        record.sessions[1].ttype = Some(String::new());
        let mut out = Vec::new();
        record.write_to(&mut out).unwrap();

        let parsed = RebootRecord::read_from(Cursor::new(out)).unwrap();
        assert_eq!(parsed.sessions[0].prefix.as_deref(), Some("__NONE__"));
        assert_eq!(parsed.sessions[0].suffix.as_deref(), Some("-"));
        assert_eq!(parsed.sessions[1].prefix, None);
        assert_eq!(parsed.sessions[1].ttype.as_deref(), Some(""));
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_missing_header() {
        let err = RebootRecord::read_from(Cursor::new("3\n")).unwrap_err();
        assert!(matches!(err, NetError::Reboot { line: 1, .. }));
    }

    #[test]
    fn test_truncated_record() {
        let err = RebootRecord::read_from(Cursor::new("V1023\n3\n4\n-1\n9\n7\n")).unwrap_err();
        match err {
            NetError::Reboot { line, reason } => {
                assert_eq!(line, 7);
                assert_eq!(reason, "unexpected end of file");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_older_format_without_optional_sections() {
        // SCREENSIZE only; every other section is absent, including the doing strings
        let text = "V1\n3\n9\n5\n100\n0\n2\n-1\n100\n\"__NONE__\"\n\"__NONE__\"\n\"h\"\n\"1.2.3.4\"\n0\n\"doing\"\n80\n25\n0\n\"poll\"\n50\n1\n";
        let record = RebootRecord::read_from(Cursor::new(text)).unwrap();
        assert_eq!(record.local_listener, -1);
        assert_eq!(record.sessions.len(), 1);
        let session = &record.sessions[0];
        assert_eq!(session.fd, 5);
        assert_eq!(session.width, 80);
        assert_eq!(session.kind, TransportKind::PlainIp);
        assert_eq!(record.first_start, 50);
        assert_eq!(record.reboot_count, 1);
        assert_eq!(record.offload_pid, None);
    }

    #[test]
    fn test_save_and_load_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reboot.db");
        assert!(RebootRecord::load(&path).unwrap().is_none());

        let record = sample();
        record.save(&path).unwrap();
        let loaded = RebootRecord::load(&path).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(!path.exists());
    }

    fn text() -> impl Strategy<Value = String> {
        prop_oneof![
            r"[ -~\n\r]{0,24}",
            any::<String>(),
            Just(NOVALUE.to_string()),
            Just(LEGACY_NOVALUE.to_string()),
        ]
    }

    fn kind() -> impl Strategy<Value = TransportKind> {
        prop_oneof![
            Just(TransportKind::PlainIp),
            Just(TransportKind::TlsIp),
            Just(TransportKind::TlsProxy),
            Just(TransportKind::LocalSocket),
        ]
    }

    fn session_record() -> impl Strategy<Value = SessionRecord> {
        (
            (1..RawFd::MAX, any::<i64>(), any::<bool>(), any::<u32>()),
            (proptest::option::of(0..i64::MAX), any::<i64>()),
            (proptest::option::of(text()), proptest::option::of(text()), text(), text()),
            (any::<u32>(), any::<u16>(), any::<u16>(), proptest::option::of(text())),
            (kind(), text(), any::<i64>()),
        )
            .prop_map(
                |(
                    (fd, connected_at, hidden, cmds),
                    (player, last_time),
                    (prefix, suffix, host, ip),
                    (flags, width, height, ttype),
                    (kind, checksum, conn_log_id),
                )| SessionRecord {
                    fd,
                    connected_at,
                    hidden,
                    cmds,
                    player,
                    last_time,
                    prefix,
                    suffix,
                    host,
                    ip,
                    flags,
                    width,
                    height,
                    ttype,
                    kind,
                    checksum,
                    conn_log_id,
                },
            )
    }

    proptest! {
        #[test]
        fn prop_record_round_trip(
            listeners in (-1..1024, -1..1024, -1..1024, -1..65536),
            sessions in proptest::collection::vec(session_record(), 0..16),
            first_start in any::<i64>(),
            reboot_count in any::<u32>(),
            offload_pid in proptest::option::of(1..i32::MAX),
        ) {
            let (listener, local_listener, tls_listener, max_fd) = listeners;
            let record = RebootRecord {
                features: RecordFeatures::CURRENT,
                listener,
                local_listener,
                tls_listener,
                max_fd,
                sessions,
                first_start,
                reboot_count,
                offload_pid,
            };
            let mut out = Vec::new();
            record.write_to(&mut out).unwrap();
            let parsed = RebootRecord::read_from(Cursor::new(out)).unwrap();
            prop_assert_eq!(parsed, record);
        }
    }

    #[test]
    fn test_fd_checks() {
        let file = tempfile::tempfile().unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&file);
        assert!(fd_is_open(fd));
        clear_cloexec(fd).unwrap();
        let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
        assert!(!flags.contains(FdFlag::FD_CLOEXEC));
        assert!(!fd_is_open(-1));
    }
}
