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
//! netmush-sslproxy binary

use clap::Parser;
use netmush_sslproxy::ProxyArgs;
use nix::sys::signal::{SigHandler, Signal, signal};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ProxyArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    // SAFETY: installs SIG_IGN before any other thread could depend on the default action.
    // Interactive interrupts reach the whole process group; the parent stops us with SIGTERM.
    if let Err(err) = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) } {
        tracing::warn!(%err, "Unable to ignore SIGINT");
    }

    match netmush_sslproxy::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "TLS offload stopped");
            ExitCode::FAILURE
        }
    }
}
