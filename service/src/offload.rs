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
//! Supervision of the TLS offload subprocess.
//!
//! The subprocess terminates TLS on the TLS port and relays each client to the local socket
//! behind an `ip^host` preamble. The supervisor starts it, reaps it when it exits, restarts
//! it within a rate limit and remembers its PID, which is the PID the trust policy accepts.

use crate::config::{ServiceConfig, TlsConfig};
use crate::error::{NetError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Restarts allowed within [`RESTART_WINDOW`]
pub const MAX_RESTARTS: usize = 5;

/// Window for [`MAX_RESTARTS`]
pub const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// What the subprocess is started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadCommand {
    /// Subprocess binary
    pub binary: PathBuf,
    /// Local socket to relay to
    pub socket_path: PathBuf,
    /// Address to listen on
    pub address: String,
    /// TLS port
    pub port: u16,
    /// Private key, PEM
    pub key_file: PathBuf,
    /// CA bundle for client certificates, if any
    pub ca_file: Option<PathBuf>,
    /// Require a client certificate
    pub require_client_cert: bool,
    /// TCP keepalive idle seconds
    pub keepalive_secs: u32,
    /// Certificate chain, PEM, when it is not in the key file
    pub cert_file: Option<PathBuf>,
}

impl OffloadCommand {
    /// Derive the command from the configuration
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let TlsConfig {
            address,
            cert_file,
            key_file,
            ca_file,
            require_client_cert,
            ..
        } = &config.tls;
        let address = address.ok_or_else(|| NetError::Config("offload requires tls.address".into()))?;
        let socket_path = config
            .local_socket
            .clone()
            .ok_or_else(|| NetError::Config("offload requires local_socket".into()))?;
        let key_file = key_file
            .clone()
            .ok_or_else(|| NetError::Config("offload requires tls.key_file".into()))?;
        Ok(Self {
            binary: config.offload.binary.clone(),
            socket_path,
            address: address.ip().to_string(),
            port: address.port(),
            key_file,
            ca_file: ca_file.clone(),
            require_client_cert: *require_client_cert,
            keepalive_secs: config.offload.keepalive_secs,
            cert_file: cert_file.clone(),
        })
    }

    /// Positional arguments: socket path, address, port, key file, CA file (`-` for none),
    /// require-client-cert (`0`/`1`), keepalive seconds, then the certificate file.
    pub fn args(&self) -> Vec<OsString> {
        let mut args = vec![
            self.socket_path.clone().into_os_string(),
            OsString::from(&self.address),
            OsString::from(self.port.to_string()),
            self.key_file.clone().into_os_string(),
            self.ca_file
                .clone()
                .map_or_else(|| OsString::from("-"), PathBuf::into_os_string),
            OsString::from(if self.require_client_cert { "1" } else { "0" }),
            OsString::from(self.keepalive_secs.to_string()),
        ];
        if let Some(cert_file) = &self.cert_file {
            args.push(cert_file.clone().into_os_string());
        }
        args
    }
}

/// Starts, reaps and restarts the subprocess
#[derive(Debug)]
pub struct OffloadSupervisor {
    command: OffloadCommand,
    pid: Option<Pid>,
    restarts: VecDeque<Instant>,
    disabled: bool,
    halting: bool,
}

impl OffloadSupervisor {
    /// A supervisor with no running child
    pub fn new(command: OffloadCommand) -> Self {
        Self {
            command,
            pid: None,
            restarts: VecDeque::new(),
            disabled: false,
            halting: false,
        }
    }

    /// PID of the running subprocess
    pub fn pid(&self) -> Option<i32> {
        self.pid.map(Pid::as_raw)
    }

    /// True after too many restarts
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Take over a subprocess started before a reboot, if it is still alive
    pub fn adopt(&mut self, pid: i32) -> bool {
        let pid = Pid::from_raw(pid);
        if kill(pid, None).is_ok() {
            info!(pid = pid.as_raw(), "Adopted running ssl_slave");
            self.pid = Some(pid);
            self.halting = false;
            true
        } else {
            warn!(pid = pid.as_raw(), "ssl_slave from before reboot is gone");
            false
        }
    }

    /// Start the subprocess unless it runs already or restarting is disabled
    pub fn start(&mut self) -> Result<()> {
        if self.pid.is_some() || self.disabled || self.halting {
            return Ok(());
        }
        let child = Command::new(&self.command.binary)
            .args(self.command.args())
            .stdin(Stdio::null())
            .spawn()?;
        let pid = i32::try_from(child.id()).map_err(|_| NetError::Config("subprocess PID out of range".into()))?;
        info!(pid, binary = %self.command.binary.display(), port = self.command.port, "Spawning ssl_slave");
        self.pid = Some(Pid::from_raw(pid));
        Ok(())
    }

    /// Collect exited children and restart the subprocess if it was among them.
    /// Returns true when the trusted PID changed.
    pub fn reap(&mut self, now: Instant) -> bool {
        let mut lost = false;
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(WaitStatus::Exited(pid, code)) if Some(pid) == self.pid => {
                    warn!(pid = pid.as_raw(), code, "ssl_slave exited");
                    lost = true;
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) if Some(pid) == self.pid => {
                    warn!(pid = pid.as_raw(), %signal, "ssl_slave killed");
                    lost = true;
                }
                Ok(_) => {}
                Err(Errno::EINTR) => {}
                Err(err) => {
                    warn!(%err, "waitpid failed");
                    break;
                }
            }
        }
        if !lost {
            return false;
        }
        self.pid = None;
        if self.halting {
            return true;
        }
        if self.note_restart(now) {
            if let Err(err) = self.start() {
                error!(%err, "Unable to restart ssl_slave");
            }
        }
        true
    }

    /// Count a restart; false once the rate limit is exceeded
    fn note_restart(&mut self, now: Instant) -> bool {
        while self
            .restarts
            .front()
            .is_some_and(|started| now.duration_since(*started) > RESTART_WINDOW)
        {
            self.restarts.pop_front();
        }
        if self.restarts.len() >= MAX_RESTARTS {
            error!("Disabling ssl_slave due to too many errors");
            self.disabled = true;
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    /// Stop the subprocess for good
    pub fn stop(&mut self) {
        self.halting = true;
        if let Some(pid) = self.pid.take() {
            info!(pid = pid.as_raw(), "Stopping ssl_slave");
            if let Err(err) = kill(pid, Signal::SIGTERM) {
                warn!(pid = pid.as_raw(), %err, "Unable to signal ssl_slave");
            }
        }
    }

    /// Forget the subprocess without stopping it, for a reboot hand-off
    pub fn release(&mut self) -> Option<i32> {
        self.halting = true;
        self.pid.take().map(Pid::as_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OffloadConfig;

    fn command() -> OffloadCommand {
        OffloadCommand {
            binary: PathBuf::from("/bin/true"),
            socket_path: PathBuf::from("/tmp/netmush.sock"),
            address: "0.0.0.0".to_string(),
            port: 4202,
            key_file: PathBuf::from("key.pem"),
            ca_file: None,
            require_client_cert: false,
            keepalive_secs: 300,
            cert_file: Some(PathBuf::from("cert.pem")),
        }
    }

    #[test]
    fn test_args_are_positional() {
        let args = command().args();
        let args: Vec<_> = args.iter().map(|arg| arg.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["/tmp/netmush.sock", "0.0.0.0", "4202", "key.pem", "-", "0", "300", "cert.pem"]
        );
    }

    #[test]
    fn test_from_config() {
        let config = ServiceConfig::new()
            .with_local_socket("/run/netmush.sock")
            .with_tls(TlsConfig {
                address: Some("127.0.0.1:4202".parse().unwrap()),
                cert_file: Some(PathBuf::from("cert.pem")),
                key_file: Some(PathBuf::from("key.pem")),
                ..TlsConfig::default()
            })
            .with_offload(OffloadConfig {
                enabled: true,
                ..OffloadConfig::default()
            });
        let command = OffloadCommand::from_config(&config).unwrap();
        assert_eq!(command.port, 4202);
        assert_eq!(command.address, "127.0.0.1");
        assert_eq!(command.binary, PathBuf::from("netmush-sslproxy"));

        assert!(OffloadCommand::from_config(&ServiceConfig::new()).is_err());
    }

    #[test]
    fn test_restart_limit() {
        let mut supervisor = OffloadSupervisor::new(command());
        let start = Instant::now();
        for attempt in 0..MAX_RESTARTS {
            assert!(supervisor.note_restart(start + Duration::from_secs(attempt as u64)));
        }
        assert!(!supervisor.note_restart(start + Duration::from_secs(10)));
        assert!(supervisor.is_disabled());
    }

    #[test]
    fn test_restart_window_slides() {
        let mut supervisor = OffloadSupervisor::new(command());
        let start = Instant::now();
        for attempt in 0..MAX_RESTARTS {
            assert!(supervisor.note_restart(start + Duration::from_secs(attempt as u64)));
        }
        assert!(supervisor.note_restart(start + Duration::from_secs(70)));
        assert!(!supervisor.is_disabled());
    }

    #[test]
    fn test_adopt_checks_liveness() {
        let mut supervisor = OffloadSupervisor::new(command());
        assert!(supervisor.adopt(std::process::id() as i32));
        assert_eq!(supervisor.pid(), Some(std::process::id() as i32));
        assert_eq!(supervisor.release(), Some(std::process::id() as i32));
        assert_eq!(supervisor.pid(), None);
    }
}
