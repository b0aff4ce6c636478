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
//! Error types for the TLS offload subprocess

use thiserror::Error;

/// Result type for proxy operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Proxy error types
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error on a socket or certificate file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed system call
    #[error("System error: {0}")]
    Sys(#[from] nix::Error),

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Bad command line or certificate material
    #[error("Configuration error: {0}")]
    Config(String),

    /// The handshake did not finish in time
    #[error("Handshake timed out")]
    HandshakeTimeout,
}

impl ProxyError {
    /// True when the error concerns a single client and the proxy keeps running
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ProxyError::Io(_) | ProxyError::Tls(_) | ProxyError::HandshakeTimeout)
    }
}
