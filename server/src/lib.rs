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
//! # netmush-server
//!
//! The `netmush` binary: parses the command line, loads the TOML configuration, installs the
//! log subscriber and runs a [`netmush_service::Server`] with the [`Lobby`] interpreter.

mod cli;
mod error;
mod lobby;

pub use cli::{Cli, detach, init_logging};
pub use error::{ServerError, ServerResult};
pub use lobby::Lobby;

use netmush_service::Server;
use tracing::info;

/// Bind, serve until shutdown, and return. A reboot replaces the process image instead.
pub fn start(cli: &Cli) -> ServerResult<()> {
    if !cli.no_session {
        detach();
    }
    let config = cli.load_config()?;
    let mut server = Server::bind(config, Lobby::new())?;
    let handle = server.handle();
    server.interpreter_mut().attach(handle);
    info!(
        port = ?server.local_addr(),
        tls_port = ?server.tls_local_addr(),
        reboots = server.status().reboot_count,
        "netmush ready"
    );
    server.run()?;
    info!("netmush stopped");
    Ok(())
}
