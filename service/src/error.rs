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

//! Error types for the session manager

use crate::types::SessionId;
use netmush_telnetcodec::TelnetCodecError;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, NetError>;

/// Session manager error types
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O error from a socket or file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed system call
    #[error("System error: {0}")]
    Sys(#[from] nix::Error),

    /// TLS failure on one connection
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Protocol error from the telnet codec
    #[error("Protocol error: {0}")]
    Protocol(#[from] TelnetCodecError),

    /// Session with the given ID was not found
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    /// A local connection failed the peer credential check
    #[error("Untrusted local connection: {0}")]
    Untrusted(String),

    /// A local connection sent no usable `ip^host` preamble
    #[error("Invalid proxy preamble: {0}")]
    Preamble(String),

    /// The reboot record could not be read
    #[error("Reboot record line {line}: {reason}")]
    Reboot {
        /// One-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The admission ceiling was reached
    #[error("Maximum sessions ({0}) reached")]
    MaxSessions(usize),
}

impl NetError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors affect at most one connection and the event loop keeps running.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetError::Io(_)
                | NetError::Tls(_)
                | NetError::Protocol(_)
                | NetError::SessionNotFound(_)
                | NetError::Untrusted(_)
                | NetError::Preamble(_)
                | NetError::MaxSessions(_)
        )
    }

    /// Check if the error ends a single session
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            NetError::Io(_) | NetError::Tls(_) | NetError::SessionNotFound(_) | NetError::Untrusted(_)
        )
    }

    /// True for socket errors that only mean "try again later"
    pub fn is_would_block(&self) -> bool {
        match self {
            NetError::Io(err) => {
                matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted)
            }
            NetError::Sys(errno) => matches!(*errno, nix::Error::EAGAIN | nix::Error::EINTR),
            _ => false,
        }
    }
}
