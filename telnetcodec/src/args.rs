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

use crate::TelnetOption;
use crate::charset::CharsetReply;
use crate::consts;
use crate::gmcp::GmcpMessage;
use crate::naws::WindowSize;
use crate::result::{SubnegotiationErrorKind, TelnetCodecError, TelnetCodecResult};
use crate::ttype::TerminalTypeReply;
use bytes::Bytes;

pub mod charset;
/// GMCP (Generic Mud Communication Protocol) argument parsing and handling
pub mod gmcp;
pub mod mssp;
pub mod naws;
pub mod ttype;

///
/// Telnet Subnegotiation Argument, decoded from the payload of `IAC SB <option> ... IAC SE`.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetArgument {
    /// Window size reported by the client.
    NAWSWindowSize(WindowSize),
    /// Terminal type exchange.
    TerminalType(TerminalTypeReply),
    /// Charset exchange.
    Charset(CharsetReply),
    /// GMCP message.
    GMCP(GmcpMessage),
    /// A subnegotiation for an option without a structured decoder.
    Unknown(TelnetOption, Bytes),
}

impl TelnetArgument {
    /// Decodes `payload` according to `option`.
    pub fn decode(option: TelnetOption, payload: Bytes) -> TelnetCodecResult<TelnetArgument> {
        match option {
            TelnetOption::NAWS => {
                if payload.len() != 4 {
                    return Err(TelnetCodecError::SubnegotiationError {
                        option: Some(consts::option::NAWS),
                        reason: SubnegotiationErrorKind::InsufficientData {
                            required: 4,
                            available: payload.len(),
                        },
                    });
                }
                let mut src = payload;
                Ok(TelnetArgument::NAWSWindowSize(WindowSize::decode(&mut src)?))
            }
            TelnetOption::TTYPE => Ok(TelnetArgument::TerminalType(TerminalTypeReply::decode(
                &payload,
            )?)),
            TelnetOption::Charset => Ok(TelnetArgument::Charset(CharsetReply::decode(&payload)?)),
            TelnetOption::GMCP => GmcpMessage::parse(&payload).map(TelnetArgument::GMCP).ok_or(
                TelnetCodecError::SubnegotiationError {
                    option: Some(consts::option::GMCP),
                    reason: SubnegotiationErrorKind::InvalidText,
                },
            ),
            other => Ok(TelnetArgument::Unknown(other, payload)),
        }
    }

    /// The option this argument belongs to.
    pub fn option(&self) -> TelnetOption {
        match self {
            TelnetArgument::NAWSWindowSize(_) => TelnetOption::NAWS,
            TelnetArgument::TerminalType(_) => TelnetOption::TTYPE,
            TelnetArgument::Charset(_) => TelnetOption::Charset,
            TelnetArgument::GMCP(_) => TelnetOption::GMCP,
            TelnetArgument::Unknown(option, _) => *option,
        }
    }
}
