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
//! Startup errors of the binary

use netmush_service::NetError;
use thiserror::Error;

/// Result type for the binary
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Errors that stop the binary before or while serving
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not read the configuration file
    #[error("Unable to read {path}: {source}")]
    ReadConfig {
        /// The file
        path: String,
        /// The cause
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for a service config
    #[error("Invalid configuration: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// The network layer failed
    #[error(transparent)]
    Service(#[from] NetError),

    /// The log subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}
