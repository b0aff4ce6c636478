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

//! Hand-over of connections from the TLS offload subprocess
//!
//! The subprocess terminates TLS and opens one local socket connection per client. The first
//! bytes on that connection are `"<ip>^<hostname>\r\n"`; everything after them is client
//! input. Peer credentials decide whether a local connection really is the subprocess.

use crate::error::{NetError, Result};
use crate::types::TransportKind;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io::{ErrorKind, Read};
use std::net::IpAddr;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a new local connection has to deliver its preamble
pub const PREAMBLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest acceptable preamble line
pub const MAX_PREAMBLE_LEN: usize = 512;

/// Client address announced by the subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    /// Numeric client address
    pub ip: String,
    /// Reverse DNS name, or the address again when lookup failed
    pub host: String,
}

/// Result of scanning the start of a local connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreambleParse {
    /// A full preamble occupying the first `consumed` bytes
    Complete {
        /// The announced address
        preamble: Preamble,
        /// Bytes up to and including the CR LF
        consumed: usize,
    },
    /// No line terminator yet
    Incomplete,
    /// Not a preamble
    Invalid(&'static str),
}

/// Scan `buf` for `"<ip>^<host>\r\n"`
pub fn parse_preamble(buf: &[u8]) -> PreambleParse {
    let Some(end) = buf.windows(2).position(|pair| pair == b"\r\n") else {
        return if buf.len() > MAX_PREAMBLE_LEN {
            PreambleParse::Invalid("no terminator")
        } else {
            PreambleParse::Incomplete
        };
    };
    if end > MAX_PREAMBLE_LEN {
        return PreambleParse::Invalid("too long");
    }
    let Ok(line) = std::str::from_utf8(&buf[..end]) else {
        return PreambleParse::Invalid("not text");
    };
    let Some((ip, host)) = line.split_once('^') else {
        return PreambleParse::Invalid("missing separator");
    };
    if ip.parse::<IpAddr>().is_err() {
        return PreambleParse::Invalid("bad address");
    }
    if host.is_empty() || host.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return PreambleParse::Invalid("bad hostname");
    }
    PreambleParse::Complete {
        preamble: Preamble {
            ip: ip.to_string(),
            host: host.to_string(),
        },
        consumed: end + 2,
    }
}

/// Wait up to `timeout` for the preamble on a non-blocking local stream. Returns the
/// preamble and any client bytes that arrived behind it.
pub fn read_preamble(stream: &UnixStream, timeout: Duration) -> Result<(Preamble, Vec<u8>)> {
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(128);
    let mut chunk = [0u8; 512];
    loop {
        match parse_preamble(&buf) {
            PreambleParse::Complete { preamble, consumed } => {
                let extra = buf.split_off(consumed);
                return Ok((preamble, extra));
            }
            PreambleParse::Invalid(reason) => return Err(NetError::Preamble(reason.to_string())),
            PreambleParse::Incomplete => {}
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(NetError::Preamble("timed out".to_string()));
        }
        {
            let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
            let wait = u16::try_from(remaining.as_millis().max(1)).unwrap_or(u16::MAX);
            match poll(&mut fds, PollTimeout::from(wait)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {}
                Err(errno) => return Err(errno.into()),
            }
        }
        match (&*stream).read(&mut chunk) {
            Ok(0) => return Err(NetError::Preamble("closed before preamble".to_string())),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(err) => return Err(err.into()),
        }
    }
}

/// Identity of the process on the other end of a local socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Peer process id, when the platform reports one
    pub pid: Option<i32>,
    /// Peer user id
    pub uid: u32,
}

/// Ask the kernel who is connected, `None` where the platform cannot say
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use nix::sys::socket::{getsockopt, sockopt};
    match getsockopt(stream, sockopt::PeerCredentials) {
        Ok(creds) => Some(PeerCredentials {
            pid: Some(creds.pid()).filter(|pid| *pid > 0),
            uid: creds.uid(),
        }),
        Err(errno) => {
            debug!(%errno, "Peer credentials unavailable");
            None
        }
    }
}

/// Ask the kernel who is connected, `None` where the platform cannot say
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn peer_credentials(_stream: &UnixStream) -> Option<PeerCredentials> {
    None
}

/// Decides what a local connection is allowed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustPolicy {
    proxy_pid: Option<i32>,
    uid: u32,
    allow_foreign: bool,
}

impl TrustPolicy {
    /// A policy trusting this process's user
    pub fn new(allow_foreign: bool) -> Self {
        Self::with_uid(nix::unistd::getuid().as_raw(), allow_foreign)
    }

    /// A policy trusting `uid`
    pub fn with_uid(uid: u32, allow_foreign: bool) -> Self {
        Self {
            proxy_pid: None,
            uid,
            allow_foreign,
        }
    }

    /// Record the running subprocess
    pub fn set_proxy_pid(&mut self, pid: Option<i32>) {
        self.proxy_pid = pid;
    }

    /// The subprocess PID currently trusted
    pub fn proxy_pid(&self) -> Option<i32> {
        self.proxy_pid
    }

    /// Classify a local peer.
    ///
    /// A reported PID must be the subprocess's. Only when the platform reports no PID does a
    /// peer of the same user count as the proxy, and without any credentials the peer is
    /// assumed to be the proxy. Everything else is a plain local client when allowed and
    /// rejected otherwise.
    pub fn authorize(&self, creds: Option<PeerCredentials>) -> Result<TransportKind> {
        let Some(creds) = creds else {
            return Ok(TransportKind::TlsProxy);
        };
        let is_proxy = match creds.pid {
            Some(pid) => self.proxy_pid == Some(pid),
            None => creds.uid == self.uid,
        };
        if is_proxy {
            Ok(TransportKind::TlsProxy)
        } else if self.allow_foreign {
            debug!(pid = ?creds.pid, uid = creds.uid, "Local connection from a foreign process");
            Ok(TransportKind::LocalSocket)
        } else {
            warn!(pid = ?creds.pid, uid = creds.uid, "Rejecting local connection");
            Err(NetError::Untrusted(format!("pid {:?} uid {}", creds.pid, creds.uid)))
        }
    }
}
