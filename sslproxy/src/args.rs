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
//! Command line of the offload subprocess.
//!
//! The arguments are positional because the parent builds them:
//! `<socket> <address> <port> <key> <ca|-> <require 0|1> <keepalive> [cert]`.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Positional arguments handed over by the main process
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "netmush-sslproxy", version, about = "TLS offload for netmush")]
pub struct ProxyArgs {
    /// Local socket of the main process
    pub socket_path: PathBuf,
    /// Address to listen on
    pub address: String,
    /// TLS port
    pub port: u16,
    /// PEM private key
    pub key_file: PathBuf,
    /// PEM CA bundle for client certificates, or `-`
    pub ca_file: String,
    /// Require a client certificate (`0` or `1`)
    #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
    pub require_client_cert: u8,
    /// TCP keepalive idle time in seconds, `0` to disable
    pub keepalive_secs: u32,
    /// PEM certificate chain; defaults to the key file
    pub cert_file: Option<PathBuf>,
    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ProxyArgs {
    /// The CA bundle, if one was given
    pub fn ca_file(&self) -> Option<PathBuf> {
        (self.ca_file != "-" && !self.ca_file.is_empty()).then(|| PathBuf::from(&self.ca_file))
    }

    /// The certificate chain
    pub fn cert_file(&self) -> PathBuf {
        self.cert_file.clone().unwrap_or_else(|| self.key_file.clone())
    }

    /// True when clients must present a certificate
    pub fn require_client_cert(&self) -> bool {
        self.require_client_cert == 1
    }

    /// Keepalive idle time, `None` when disabled
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(u64::from(self.keepalive_secs)))
    }
}
