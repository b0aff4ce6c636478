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
//! Command line, configuration loading and log setup

use crate::error::{ServerError, ServerResult};
use clap::Parser;
use netmush_service::ServiceConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// netmush connection front-end
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "netmush", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Default log filter; `RUST_LOG` takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Stay in the current session; passed to the new image on reboot
    #[arg(long, hide = true)]
    pub no_session: bool,
}

impl Cli {
    /// The configuration file's contents over the defaults, validated
    pub fn load_config(&self) -> ServerResult<ServiceConfig> {
        let config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ServerError::ReadConfig {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str::<ServiceConfig>(&text)?
            }
            None => ServiceConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Install the global subscriber
pub fn init_logging(level: &str, json: bool) -> ServerResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|err| ServerError::Logging(err.to_string()))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|err| ServerError::Logging(err.to_string()))
}

/// Leave the controlling terminal's session. Skipped after a reboot, where the
/// process already leads its own session.
pub fn detach() {
    match nix::unistd::setsid() {
        Ok(sid) => tracing::debug!(%sid, "Started new session"),
        Err(err) => tracing::debug!(%err, "Keeping current session"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from(["netmush", "--config", "game.toml", "--json-logs", "--no-session"]);
        assert_eq!(cli.config, Some(PathBuf::from("game.toml")));
        assert!(cli.json_logs);
        assert!(cli.no_session);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_defaults_without_file() {
        let cli = Cli::parse_from(["netmush"]);
        assert_eq!(cli.load_config().unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_sessions = 12\nmud_name = \"Lobby\"").unwrap();
        let cli = Cli::parse_from(["netmush", "-c", file.path().to_str().unwrap()]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.max_sessions, 12);
        assert_eq!(config.mud_name, "Lobby");
    }

    #[test]
    fn test_missing_file() {
        let cli = Cli::parse_from(["netmush", "-c", "/nonexistent/netmush.toml"]);
        assert!(matches!(cli.load_config(), Err(ServerError::ReadConfig { .. })));
    }

    #[test]
    fn test_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_sessions = \"many\"").unwrap();
        let cli = Cli::parse_from(["netmush", "-c", file.path().to_str().unwrap()]);
        assert!(matches!(cli.load_config(), Err(ServerError::ParseConfig(_))));
    }
}
