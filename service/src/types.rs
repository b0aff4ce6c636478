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

//! Core types for the session manager

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Unique identifier for a session (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// Opaque reference to the authenticated identity behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerRef(i64);

impl PlayerRef {
    /// Wrap an interpreter object number
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the underlying object number
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How the bytes of a session reach the process (persisted as u8 across reboots)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportKind {
    /// Plaintext TCP
    PlainIp = 0,
    /// TLS terminated in this process
    TlsIp = 1,
    /// TLS terminated by the offload subprocess, relayed over the local socket
    TlsProxy = 2,
    /// A local socket client that is not the offload subprocess
    LocalSocket = 3,
}

impl TransportKind {
    /// Convert from the persisted byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PlainIp),
            1 => Some(Self::TlsIp),
            2 => Some(Self::TlsProxy),
            3 => Some(Self::LocalSocket),
            _ => None,
        }
    }

    /// Convert to the persisted byte
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The source label used in the connection log
    pub fn source(self) -> &'static str {
        match self {
            Self::PlainIp => "normal port",
            Self::TlsIp => "TLS port",
            Self::TlsProxy => "TLS proxy",
            Self::LocalSocket => "unix port",
        }
    }

    /// True when the client link is encrypted
    pub fn is_secure(self) -> bool {
        matches!(self, Self::TlsIp | Self::TlsProxy)
    }

    /// True when the socket is a Unix domain socket
    pub fn is_local(self) -> bool {
        matches!(self, Self::TlsProxy | Self::LocalSocket)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source())
    }
}

/// Per-session protocol flags.
///
/// The bit values are persisted in the reboot record and must not be renumbered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnFlags(u32);

impl ConnFlags {
    /// Nothing set
    pub const EMPTY: ConnFlags = ConnFlags(0);
    /// The client speaks telnet
    pub const TELNET: ConnFlags = ConnFlags(1);
    /// A telnet probe was sent and no reply seen yet
    pub const TELNET_QUERY: ConnFlags = ConnFlags(1 << 1);
    /// Pueblo rich-text mode
    pub const HTML: ConnFlags = ConnFlags(1 << 2);
    /// Text is exchanged as UTF-8
    pub const UTF8: ConnFlags = ConnFlags(1 << 3);
    /// Accented output is folded to ASCII
    pub const STRIP_ACCENTS: ConnFlags = ConnFlags(1 << 4);
    /// GMCP was negotiated
    pub const GMCP: ConnFlags = ConnFlags(1 << 5);
    /// Upgraded to WebSocket framing
    pub const WEBSOCKETS: ConnFlags = ConnFlags(1 << 6);
    /// A WebSocket upgrade request is being read
    pub const WEBSOCKETS_REQUEST: ConnFlags = ConnFlags(1 << 7);
    /// An HTTP request is being read
    pub const HTTP_REQUEST: ConnFlags = ConnFlags(1 << 8);
    /// A complete HTTP request waits for the execution pass
    pub const HTTP_READY: ConnFlags = ConnFlags(1 << 9);
    /// Close once the HTTP response is flushed
    pub const HTTP_CLOSE: ConnFlags = ConnFlags(1 << 10);
    /// Prompts end with a newline
    pub const PROMPT_NEWLINES: ConnFlags = ConnFlags(1 << 11);
    /// Nothing has been received yet
    pub const AWAITING_FIRST_DATA: ConnFlags = ConnFlags(1 << 12);
    /// A write failed
    pub const SOCKET_ERROR: ConnFlags = ConnFlags(1 << 13);
    /// Closed during a reboot; announce and drop on load
    pub const CLOSE_READY: ConnFlags = ConnFlags(1 << 14);
    /// The cached telnet offers went out
    pub const OFFERS_SENT: ConnFlags = ConnFlags(1 << 15);
    /// Shutdown was requested; nothing more is queued
    pub const NO_WRITES: ConnFlags = ConnFlags(1 << 16);

    /// Rebuild from persisted bits
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set
    pub fn contains(self, other: ConnFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set
    pub fn intersects(self, other: ConnFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: ConnFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: ConnFlags) {
        self.0 &= !other.0;
    }

    /// Set or clear the bits of `other`
    pub fn set(&mut self, other: ConnFlags, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for ConnFlags {
    type Output = ConnFlags;

    fn bitor(self, rhs: ConnFlags) -> ConnFlags {
        ConnFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnFlags {
    fn bitor_assign(&mut self, rhs: ConnFlags) {
        self.0 |= rhs.0;
    }
}

/// Why a session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// The client sent QUIT
    Quit,
    /// The peer closed the connection
    Disconnect,
    /// A read or write failed
    SocketError,
    /// An HTTP exchange finished
    HttpDisconnect,
    /// The interpreter refused the site
    Sitelocked,
    /// The interpreter booted the session
    Booted,
    /// The process is shutting down
    Shutdown,
    /// TLS sessions cannot survive a reboot
    Reboot,
    /// TLS accept or handshake failed
    TlsFailure,
    /// The TLS handshake missed its deadline
    HandshakeTimeout,
}

impl ShutdownReason {
    /// The label used in the connection log and disconnect notices
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quit => "quit",
            Self::Disconnect => "disconnect",
            Self::SocketError => "socket error",
            Self::HttpDisconnect => "http disconnect",
            Self::Sitelocked => "sitelocked",
            Self::Booted => "booted",
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::TlsFailure => "ssl failure",
            Self::HandshakeTimeout => "ssl handshake timeout",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id1 = SessionId::new(1);
        let id2 = SessionId::new(2);

        assert_eq!(id1.as_u64(), 1);
        assert_ne!(id1, id2);
        assert!(id1 < id2);
        assert_eq!(id2.to_string(), "sess-2");
    }

    #[test]
    fn test_transport_kind_conversion() {
        for kind in [
            TransportKind::PlainIp,
            TransportKind::TlsIp,
            TransportKind::TlsProxy,
            TransportKind::LocalSocket,
        ] {
            assert_eq!(TransportKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(TransportKind::from_u8(9), None);
    }

    #[test]
    fn test_transport_kind_source() {
        assert_eq!(TransportKind::PlainIp.to_string(), "normal port");
        assert_eq!(TransportKind::TlsProxy.source(), "TLS proxy");
        assert!(TransportKind::TlsProxy.is_secure());
        assert!(TransportKind::TlsProxy.is_local());
        assert!(!TransportKind::TlsIp.is_local());
    }

    #[test]
    fn test_conn_flags() {
        let mut flags = ConnFlags::PROMPT_NEWLINES | ConnFlags::AWAITING_FIRST_DATA;
        assert!(flags.contains(ConnFlags::PROMPT_NEWLINES));
        assert!(!flags.contains(ConnFlags::PROMPT_NEWLINES | ConnFlags::TELNET));
        assert!(flags.intersects(ConnFlags::PROMPT_NEWLINES | ConnFlags::TELNET));

        flags.remove(ConnFlags::AWAITING_FIRST_DATA);
        flags.set(ConnFlags::UTF8, true);
        assert_eq!(flags, ConnFlags::from_bits(ConnFlags::PROMPT_NEWLINES.bits() | ConnFlags::UTF8.bits()));

        flags.set(ConnFlags::UTF8, false);
        assert_eq!(flags, ConnFlags::PROMPT_NEWLINES);
    }

    #[test]
    fn test_shutdown_reason_labels() {
        assert_eq!(ShutdownReason::Quit.to_string(), "quit");
        assert_eq!(ShutdownReason::SocketError.as_str(), "socket error");
        assert_eq!(ShutdownReason::HttpDisconnect.as_str(), "http disconnect");
    }
}
