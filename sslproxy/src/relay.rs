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
//! One relayed client: TLS handshake, reverse lookup, local connect, preamble, then bytes
//! both ways. The first side to reach EOF ends the connection; the other side is flushed and
//! closed. On drain both directions keep copying for up to [`DRAIN_TIMEOUT`] first.

use crate::error::{ProxyError, ProxyResult};
use crate::resolve;
use dashmap::DashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

/// Longest a client may take to finish the handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest a draining connection keeps copying bytes already in flight
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a relayed connection is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// TLS handshake in progress
    Accepting,
    /// Waiting for reverse DNS
    HostnameLookup,
    /// Connecting to the main process
    LocalConnecting,
    /// Relaying
    Established,
    /// Flushing both sides before closing
    ShuttingDown,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnState::Accepting => "accepting",
            ConnState::HostnameLookup => "hostname lookup",
            ConnState::LocalConnecting => "local connecting",
            ConnState::Established => "established",
            ConnState::ShuttingDown => "shutting down",
        })
    }
}

/// Bookkeeping for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    /// Client address
    pub peer: SocketAddr,
    /// Current state
    pub state: ConnState,
    /// Resolved host name, once known
    pub host: Option<String>,
    /// When the client connected
    pub opened: Instant,
}

/// Live connections by id
pub type Registry = Arc<DashMap<u64, ConnInfo>>;

/// The first line written to the main process
pub fn preamble(ip: IpAddr, host: &str) -> String {
    format!("{ip}^{host}\r\n")
}

fn set_state(registry: &Registry, id: u64, state: ConnState) {
    if let Some(mut info) = registry.get_mut(&id) {
        info.state = state;
    }
}

/// Relay one accepted client to the local socket at `socket_path`
pub async fn relay(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    socket_path: &Path,
    registry: &Registry,
    mut shutdown: watch::Receiver<bool>,
) -> ProxyResult<()> {
    let tls = tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream))
        .await
        .map_err(|_| ProxyError::HandshakeTimeout)??;
    if let Some(cert) = tls.get_ref().1.peer_certificates().and_then(|certs| certs.first()) {
        info!(id, %peer, cert_len = cert.len(), "Client certificate accepted");
    }

    set_state(registry, id, ConnState::HostnameLookup);
    let ip = peer.ip().to_canonical();
    let host = resolve::hostname(ip).await;
    if let Some(mut info) = registry.get_mut(&id) {
        info.host = Some(host.clone());
    }

    set_state(registry, id, ConnState::LocalConnecting);
    let mut local = UnixStream::connect(socket_path).await?;
    local.write_all(preamble(ip, &host).as_bytes()).await?;
    set_state(registry, id, ConnState::Established);
    info!(id, %ip, %host, "Relaying");

    let (mut client_read, mut client_write) = tokio::io::split(tls);
    let (mut local_read, mut local_write) = local.into_split();
    {
        let to_local = tokio::io::copy(&mut client_read, &mut local_write);
        let to_client = tokio::io::copy(&mut local_read, &mut client_write);
        tokio::pin!(to_local, to_client);
        let outcome = tokio::select! {
            result = &mut to_local => Some(("client", result)),
            result = &mut to_client => Some(("local", result)),
            _ = shutdown.wait_for(|stop| *stop) => None,
        };
        set_state(registry, id, ConnState::ShuttingDown);
        match outcome {
            Some((side, Ok(bytes))) => debug!(id, side, bytes, "Connection finished"),
            Some((side, Err(err))) => debug!(id, side, %err, "Connection ended with error"),
            None => {
                debug!(id, "Draining connection");
                let drained =
                    tokio::time::timeout(DRAIN_TIMEOUT, async { tokio::join!(&mut to_local, &mut to_client) }).await;
                if let Ok((to_local, to_client)) = drained {
                    debug!(id, ?to_local, ?to_client, "Connection drained");
                }
            }
        }
    }
    let _ = client_write.shutdown().await;
    let _ = local_write.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_format() {
        assert_eq!(
            preamble(IpAddr::from([203, 0, 113, 7]), "client.example.com"),
            "203.0.113.7^client.example.com\r\n"
        );
        assert_eq!(preamble("2001:db8::1".parse().unwrap(), "v6.example.com"), "2001:db8::1^v6.example.com\r\n");
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ConnState::HostnameLookup.to_string(), "hostname lookup");
        assert_eq!(ConnState::ShuttingDown.to_string(), "shutting down");
    }
}
