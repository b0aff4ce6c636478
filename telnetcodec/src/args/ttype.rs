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

//! Terminal Type option [RFC1091](http://www.iana.org/go/rfc1091)

use crate::{SubnegotiationErrorKind, TelnetCodecError, TelnetCodecResult, consts};

/// Terminal type subnegotiation payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalTypeReply {
    /// `IS <name>` from the client.
    Is(String),
    /// `SEND`, only ever sent by the server.
    Send,
}

impl TerminalTypeReply {
    /// Decodes a TTYPE payload. Non UTF-8 bytes in the name are replaced.
    pub fn decode(payload: &[u8]) -> TelnetCodecResult<TerminalTypeReply> {
        match payload.split_first() {
            Some((&consts::option::ttype::IS, name)) => Ok(TerminalTypeReply::Is(
                String::from_utf8_lossy(name).into_owned(),
            )),
            Some((&consts::option::ttype::SEND, _)) => Ok(TerminalTypeReply::Send),
            Some((&command, _)) => Err(TelnetCodecError::SubnegotiationError {
                option: Some(consts::option::TTYPE),
                reason: SubnegotiationErrorKind::InvalidCommand { command },
            }),
            None => Err(TelnetCodecError::SubnegotiationError {
                option: Some(consts::option::TTYPE),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 1,
                    available: 0,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_is() {
        assert_eq!(
            TerminalTypeReply::decode(b"\x00XTERM-256COLOR").unwrap(),
            TerminalTypeReply::Is("XTERM-256COLOR".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        assert!(TerminalTypeReply::decode(b"\x07abc").is_err());
        assert!(TerminalTypeReply::decode(b"").is_err());
    }
}
