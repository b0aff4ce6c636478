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
//! Accept loop of the offload subprocess.

use crate::args::ProxyArgs;
use crate::error::ProxyResult;
use crate::relay::{self, ConnInfo, ConnState, Registry};
use crate::tls;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Bound TLS listener plus everything a relay needs
pub struct Proxy {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    socket_path: Arc<PathBuf>,
    keepalive: Option<Duration>,
    registry: Registry,
    next_id: u64,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("listener", &self.listener)
            .field("socket_path", &self.socket_path)
            .field("keepalive", &self.keepalive)
            .field("connections", &self.registry.len())
            .finish()
    }
}

impl Proxy {
    /// Load the certificates and bind the TLS port
    pub async fn bind(args: &ProxyArgs) -> ProxyResult<Self> {
        let acceptor = tls::acceptor(args)?;
        let address = if args.address.is_empty() { "0.0.0.0" } else { args.address.as_str() };
        let listener = TcpListener::bind((address, args.port)).await?;
        info!(addr = %listener.local_addr()?, socket = %args.socket_path.display(), "TLS offload listening");
        Ok(Self {
            listener,
            acceptor,
            socket_path: Arc::new(args.socket_path.clone()),
            keepalive: args.keepalive(),
            registry: Registry::default(),
            next_id: 1,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Live connections
    pub fn registry(&self) -> Registry {
        Arc::clone(&self.registry)
    }

    /// Accept and relay clients until `stop` resolves, then drain every connection
    pub async fn serve<F>(mut self, stop: F) -> ProxyResult<()>
    where
        F: Future<Output = ()>,
    {
        let (drain_tx, drain_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.next_id;
                        self.next_id += 1;
                        self.spawn(&mut tasks, id, stream, peer, drain_rx.clone());
                    }
                    Err(err) => warn!(%err, "Accept failed"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        warn!(%err, "Relay task failed");
                    }
                }
                _ = &mut stop => break,
            }
        }

        info!(connections = self.registry.len(), "Draining connections");
        let _ = drain_tx.send(true);
        while tasks.join_next().await.is_some() {}
        Ok(())
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<()>,
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        drain: watch::Receiver<bool>,
    ) {
        if let Some(idle) = self.keepalive {
            if let Err(err) = set_keepalive(&stream, idle) {
                debug!(id, %err, "Unable to set keepalive");
            }
        }
        self.registry.insert(
            id,
            ConnInfo { peer, state: ConnState::Accepting, host: None, opened: Instant::now() },
        );
        let acceptor = self.acceptor.clone();
        let socket_path = Arc::clone(&self.socket_path);
        let registry = Arc::clone(&self.registry);
        tasks.spawn(async move {
            let result = relay::relay(id, stream, peer, acceptor, &socket_path, &registry, drain).await;
            let state = registry.remove(&id).map(|(_, info)| info.state);
            match result {
                Ok(()) => debug!(id, %peer, "Connection closed"),
                Err(err) if err.is_connection_error() => {
                    info!(id, %peer, ?state, %err, "Connection failed")
                }
                Err(err) => warn!(id, %peer, ?state, %err, "Connection failed"),
            }
        });
    }
}

fn set_keepalive(stream: &TcpStream, idle: Duration) -> nix::Result<()> {
    use nix::sys::socket::{setsockopt, sockopt};
    setsockopt(stream, sockopt::KeepAlive, &true)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    setsockopt(stream, sockopt::TcpKeepIdle, &u32::try_from(idle.as_secs()).unwrap_or(u32::MAX))?;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let _ = idle;
    Ok(())
}
