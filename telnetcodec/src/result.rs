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

/// Result Type for Codec Operations
pub type TelnetCodecResult<T> = Result<T, TelnetCodecError>;

/// Represents possible errors that can occur in the codec handling process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelnetCodecError {
    /// An I/O error occurred while reading from or writing to the underlying stream.
    #[error("I/O error during {operation}: {kind:?}")]
    IOError {
        /// The kind of I/O error that occurred
        kind: std::io::ErrorKind,
        /// Description of the operation that failed
        operation: String,
    },

    /// Error occurred during telnet option subnegotiation.
    #[error("Subnegotiation error for option {option:?}: {reason}")]
    SubnegotiationError {
        /// The telnet option being subnegotiated
        option: Option<u8>,
        /// Specific reason for the failure
        reason: SubnegotiationErrorKind,
    },
}

/// Specific kinds of subnegotiation errors with structured context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubnegotiationErrorKind {
    /// Insufficient data available to decode the subnegotiation.
    #[error("insufficient data (required: {required}, available: {available})")]
    InsufficientData {
        /// Number of bytes required
        required: usize,
        /// Number of bytes available
        available: usize,
    },

    /// Invalid command byte in the subnegotiation data.
    #[error("invalid command: 0x{command:02X}")]
    InvalidCommand {
        /// The invalid command byte
        command: u8,
    },

    /// Payload was not valid UTF-8 where text is required.
    #[error("payload is not valid UTF-8")]
    InvalidText,

    /// Payload exceeded the subnegotiation buffer.
    #[error("payload exceeds {limit} bytes")]
    Overflow {
        /// Configured limit
        limit: usize,
    },
}

impl From<std::io::Error> for TelnetCodecError {
    fn from(err: std::io::Error) -> Self {
        TelnetCodecError::IOError {
            kind: err.kind(),
            operation: err.to_string(),
        }
    }
}
