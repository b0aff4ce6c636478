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
//! # netmush-sslproxy
//!
//! TLS offload subprocess for the netmush front-end. It terminates TLS on behalf of the main
//! process and relays each client over the main process's local socket, introducing the
//! client with a single `"<ip>^<host>\r\n"` line.
//!
//! The main process stays single threaded and keeps its sessions across a hot reboot because
//! the TLS state lives here. This process shuts down on `SIGTERM` or when its parent goes away,
//! draining open connections first.

mod args;
mod error;
mod listener;
mod relay;
mod resolve;
mod tls;

pub use args::ProxyArgs;
pub use error::{ProxyError, ProxyResult};
pub use listener::Proxy;
pub use relay::{ConnInfo, ConnState, DRAIN_TIMEOUT, HANDSHAKE_TIMEOUT, Registry, preamble};
pub use resolve::{hostname, lookup};
pub use tls::{acceptor, load_certs, load_private_key};

use nix::unistd::{Pid, getppid};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

/// How often the parent is checked
pub const PARENT_CHECK: Duration = Duration::from_secs(5);

/// Resolves once the parent process is no longer `parent`
pub async fn parent_gone(parent: Pid, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let current = getppid();
        if current != parent {
            warn!(%parent, %current, "Parent process exited");
            return;
        }
    }
}

/// Run the proxy until `SIGTERM` or the parent exits
pub async fn run(args: ProxyArgs) -> ProxyResult<()> {
    let parent = getppid();
    let mut sigterm = signal(SignalKind::terminate())?;
    let proxy = Proxy::bind(&args).await?;
    proxy
        .serve(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = parent_gone(parent, PARENT_CHECK) => {}
            }
        })
        .await
}
