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

//! Service configuration types and builders
//!
//! Every struct here deserializes from TOML with `#[serde(default)]`, so a config file only
//! names what it changes.
//!
//! # Examples
//!
//! ```
//! use netmush_service::{GreetingMode, ServiceConfig};
//!
//! let config = ServiceConfig::new()
//!     .with_bind_address("127.0.0.1:4201".parse().unwrap())
//!     .with_max_sessions(200)
//!     .with_greeting(GreetingMode::Probe);
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{NetError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Terminal type reported until the client says otherwise
pub const DEFAULT_TTYPE: &str = "unknown";

/// What a new plaintext or TLS session is sent first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GreetingMode {
    /// Telnet offers go out as soon as the session exists, the banner right after
    #[default]
    Immediate,
    /// Probe with `IAC DO LINEMODE` after one second and send the banner a second later;
    /// offers follow the first telnet reply
    Probe,
}

/// A token bucket: `per_slice` units become available every `slice_ms`, up to `burst`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Refill period in milliseconds
    pub slice_ms: u64,
    /// Units granted per period
    pub per_slice: u32,
    /// Most units a bucket can hold
    pub burst: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            slice_ms: 1000,
            per_slice: 1,
            burst: 100,
        }
    }
}

impl QuotaConfig {
    /// Create a quota
    pub fn new(slice_ms: u64, per_slice: u32, burst: u32) -> Self {
        Self {
            slice_ms,
            per_slice,
            burst,
        }
    }

    /// Milliseconds of credit one unit costs
    pub fn cost_ms(&self) -> u64 {
        self.slice_ms / u64::from(self.per_slice.max(1))
    }

    /// The bucket ceiling in milliseconds of credit
    pub fn ceiling_ms(&self) -> u64 {
        self.cost_ms() * u64::from(self.burst)
    }
}

/// In-process TLS listener and the certificate material shared with the offload subprocess
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Address of the TLS port, or `None` for no TLS
    pub address: Option<SocketAddr>,
    /// PEM certificate chain
    pub cert_file: Option<PathBuf>,
    /// PEM private key
    pub key_file: Option<PathBuf>,
    /// PEM CA bundle used to verify client certificates
    pub ca_file: Option<PathBuf>,
    /// Reject clients without a certificate signed by `ca_file`
    pub require_client_cert: bool,
    /// Hard deadline for accept plus handshake
    pub handshake_timeout_ms: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            address: None,
            cert_file: None,
            key_file: None,
            ca_file: None,
            require_client_cert: false,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl TlsConfig {
    /// The handshake deadline
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// The TLS offload subprocess
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Terminate TLS in the subprocess instead of in-process
    pub enabled: bool,
    /// Path of the `netmush-sslproxy` binary
    pub binary: PathBuf,
    /// TCP keepalive idle time handed to the subprocess, in seconds
    pub keepalive_secs: u32,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: PathBuf::from("netmush-sslproxy"),
            keepalive_secs: 300,
        }
    }
}

/// Configuration of the whole front-end
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Plaintext listener, or `None` for no TCP port
    pub bind_address: Option<SocketAddr>,
    /// Admission ceiling; listeners leave the poll set while it is reached
    pub max_sessions: usize,
    /// Unix socket the offload subprocess and local clients connect to
    pub local_socket: Option<PathBuf>,
    /// Accept local connections whose peer is neither the subprocess nor this user
    pub allow_foreign_local: bool,
    /// TLS settings
    pub tls: TlsConfig,
    /// Offload subprocess settings
    pub offload: OffloadConfig,
    /// Per-session command bucket
    pub command_quota: QuotaConfig,
    /// Global HTTP request bucket
    pub http_quota: QuotaConfig,
    /// HTTP fallback timer
    pub http_timeout_ms: u64,
    /// Connect sequence
    pub greeting: GreetingMode,
    /// Longest poll wait
    pub poll_ceiling_ms: u64,
    /// Queued output beyond this many bytes is flushed oldest first
    pub max_output: usize,
    /// Where the reboot record is written
    pub reboot_file: PathBuf,
    /// Request path that upgrades to WebSocket
    pub websocket_url: String,
    /// Name reported by INFO and MSSP
    pub mud_name: String,
    /// Website reported by INFO and MSSP, and the HTTP redirect target
    pub mud_url: String,
    /// Answer `PUEBLOCLIENT`
    pub pueblo: bool,
    /// Extra MSSP variables
    pub mssp: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: Some(SocketAddr::from(([0, 0, 0, 0], 4201))),
            max_sessions: 1000,
            local_socket: None,
            allow_foreign_local: false,
            tls: TlsConfig::default(),
            offload: OffloadConfig::default(),
            command_quota: QuotaConfig::default(),
            http_quota: QuotaConfig::new(1000, 10, 10),
            http_timeout_ms: 2000,
            greeting: GreetingMode::Immediate,
            poll_ceiling_ms: 1000,
            max_output: 65536,
            reboot_file: PathBuf::from("reboot.db"),
            websocket_url: "/wsclient".to_string(),
            mud_name: "netmush".to_string(),
            mud_url: String::new(),
            pueblo: true,
            mssp: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plaintext listener address
    pub fn with_bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    /// Disable the plaintext listener
    pub fn without_bind_address(mut self) -> Self {
        self.bind_address = None;
        self
    }

    /// Set the admission ceiling
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the local socket path
    pub fn with_local_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_socket = Some(path.into());
        self
    }

    /// Accept local clients that are neither the subprocess nor this user
    pub fn with_foreign_local(mut self, allow: bool) -> Self {
        self.allow_foreign_local = allow;
        self
    }

    /// Set the TLS settings
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set the offload subprocess settings
    pub fn with_offload(mut self, offload: OffloadConfig) -> Self {
        self.offload = offload;
        self
    }

    /// Set the per-session command bucket
    pub fn with_command_quota(mut self, quota: QuotaConfig) -> Self {
        self.command_quota = quota;
        self
    }

    /// Set the global HTTP bucket
    pub fn with_http_quota(mut self, quota: QuotaConfig) -> Self {
        self.http_quota = quota;
        self
    }

    /// Set the HTTP fallback timer
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the connect sequence
    pub fn with_greeting(mut self, greeting: GreetingMode) -> Self {
        self.greeting = greeting;
        self
    }

    /// Set the longest poll wait
    pub fn with_poll_ceiling(mut self, ceiling: Duration) -> Self {
        self.poll_ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the per-session output limit
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    /// Set the reboot record path
    pub fn with_reboot_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.reboot_file = path.into();
        self
    }

    /// Set the WebSocket upgrade path
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    /// Set the name reported to clients
    pub fn with_mud_name(mut self, name: impl Into<String>) -> Self {
        self.mud_name = name.into();
        self
    }

    /// Set the website reported to clients
    pub fn with_mud_url(mut self, url: impl Into<String>) -> Self {
        self.mud_url = url.into();
        self
    }

    /// Add an MSSP variable
    pub fn with_mssp(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.mssp.insert(name.into(), value.into());
        self
    }

    /// The HTTP fallback timer
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// The longest poll wait
    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_millis(self.poll_ceiling_ms)
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(NetError::Config("max_sessions must be at least 1".into()));
        }
        for (name, quota) in [("command_quota", &self.command_quota), ("http_quota", &self.http_quota)] {
            if quota.per_slice == 0 || quota.burst == 0 || quota.cost_ms() == 0 {
                return Err(NetError::Config(format!("{name} must grant at least one unit per slice")));
            }
        }
        if !self.websocket_url.starts_with('/') {
            return Err(NetError::Config("websocket_url must start with '/'".into()));
        }
        if self.tls.address.is_some() && (self.tls.cert_file.is_none() || self.tls.key_file.is_none()) {
            return Err(NetError::Config("tls.address requires tls.cert_file and tls.key_file".into()));
        }
        if self.tls.require_client_cert && self.tls.ca_file.is_none() {
            return Err(NetError::Config("tls.require_client_cert requires tls.ca_file".into()));
        }
        if self.offload.enabled {
            if self.tls.address.is_none() {
                return Err(NetError::Config("offload requires tls.address".into()));
            }
            if self.local_socket.is_none() {
                return Err(NetError::Config("offload requires local_socket".into()));
            }
        }
        if self.bind_address.is_none() && self.local_socket.is_none() && self.tls.address.is_none() {
            return Err(NetError::Config("no listener configured".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.greeting, GreetingMode::Immediate);
        assert_eq!(config.http_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_quota_scaling() {
        let quota = QuotaConfig::new(1000, 4, 10);
        assert_eq!(quota.cost_ms(), 250);
        assert_eq!(quota.ceiling_ms(), 2500);
    }

    #[test]
    fn test_validate_rejects_contradictions() {
        assert!(ServiceConfig::new().with_max_sessions(0).validate().is_err());
        assert!(ServiceConfig::new().with_websocket_url("ws").validate().is_err());
        assert!(
            ServiceConfig::new()
                .with_command_quota(QuotaConfig::new(1000, 0, 10))
                .validate()
                .is_err()
        );

        let offload = OffloadConfig {
            enabled: true,
            ..OffloadConfig::default()
        };
        assert!(ServiceConfig::new().with_offload(offload).validate().is_err());

        let tls = TlsConfig {
            address: Some("0.0.0.0:4202".parse().unwrap()),
            ..TlsConfig::default()
        };
        assert!(ServiceConfig::new().with_tls(tls).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:4000"
            greeting = "probe"
            mud_name = "Test World"

            [command_quota]
            burst = 5

            [mssp]
            GENRE = "Fantasy"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_address, Some("127.0.0.1:4000".parse().unwrap()));
        assert_eq!(config.greeting, GreetingMode::Probe);
        assert_eq!(config.command_quota.burst, 5);
        assert_eq!(config.command_quota.slice_ms, 1000);
        assert_eq!(config.mssp.get("GENRE").map(String::as_str), Some("Fantasy"));
        assert_eq!(config.max_sessions, 1000);
    }
}
