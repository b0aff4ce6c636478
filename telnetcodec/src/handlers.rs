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

//! Handlers for the options the server supports.

use crate::charset::{CharsetChoice, CharsetReply, request_payload};
use crate::mssp::MudServerStatus;
use crate::ttype::TerminalTypeReply;
use crate::{Offer, OptionHandler, Request, TelnetArgument, TelnetEvent, TelnetOption, consts, escape_iac};
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tracing::{debug, warn};

fn put_command(reply: &mut BytesMut, command: u8, option: u8) {
    reply.put_u8(consts::IAC);
    reply.put_u8(command);
    reply.put_u8(option);
}

fn put_subnegotiation(reply: &mut BytesMut, option: u8, payload: &[u8]) {
    reply.put_u8(consts::IAC);
    reply.put_u8(consts::SB);
    reply.put_u8(option);
    escape_iac(payload, reply);
    reply.put_u8(consts::IAC);
    reply.put_u8(consts::SE);
}

/// Suppress Go-Ahead. `DO SGA` is answered with `WILL SGA DO SGA` and turns on prompt
/// newlines for the session.
#[derive(Clone, Copy, Debug, Default)]
pub struct SuppressGoAheadHandler;

impl OptionHandler for SuppressGoAheadHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::SuppressGoAhead
    }

    fn negotiate(&self, request: Request, reply: &mut BytesMut) -> Option<TelnetEvent> {
        if request != Request::Do {
            return None;
        }
        put_command(reply, consts::WILL, consts::option::SGA);
        put_command(reply, consts::DO, consts::option::SGA);
        Some(TelnetEvent::PromptNewlines)
    }
}

/// Terminal Type. Offered with `DO`; `WILL TTYPE` is answered with `SB TTYPE SEND`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalTypeHandler;

impl OptionHandler for TerminalTypeHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::TTYPE
    }

    fn offer(&self) -> Option<Offer> {
        Some(Offer::Do)
    }

    fn negotiate(&self, request: Request, reply: &mut BytesMut) -> Option<TelnetEvent> {
        if request == Request::Will {
            put_subnegotiation(reply, consts::option::TTYPE, &[consts::option::ttype::SEND]);
        }
        None
    }

    fn subnegotiate(&self, argument: TelnetArgument, _reply: &mut BytesMut) -> Option<TelnetEvent> {
        match argument {
            TelnetArgument::TerminalType(TerminalTypeReply::Is(name)) => {
                Some(TelnetEvent::TerminalType(name))
            }
            _ => None,
        }
    }
}

/// Window size. Offered with `DO`; only the subnegotiation carries data.
#[derive(Clone, Copy, Debug, Default)]
pub struct NawsHandler;

impl OptionHandler for NawsHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::NAWS
    }

    fn offer(&self) -> Option<Offer> {
        Some(Offer::Do)
    }

    fn negotiate(&self, _request: Request, _reply: &mut BytesMut) -> Option<TelnetEvent> {
        None
    }

    fn subnegotiate(&self, argument: TelnetArgument, _reply: &mut BytesMut) -> Option<TelnetEvent> {
        match argument {
            TelnetArgument::NAWSWindowSize(size) => Some(TelnetEvent::WindowSize(size)),
            _ => None,
        }
    }
}

/// Linemode. Not offered; the connect probe sends `DO LINEMODE` and a client answering
/// `WILL` gets client-side editing with soft tabs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinemodeHandler;

impl OptionHandler for LinemodeHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::Linemode
    }

    fn negotiate(&self, request: Request, reply: &mut BytesMut) -> Option<TelnetEvent> {
        if request == Request::Will {
            put_subnegotiation(
                reply,
                consts::option::LINEMODE,
                &[
                    consts::option::linemode::MODE,
                    consts::option::linemode::MODE_EDIT | consts::option::linemode::MODE_SOFT_TAB,
                ],
            );
        }
        None
    }
}

/// Charset. Offered with `WILL`; `DO CHARSET` gets the list of supported names.
#[derive(Clone, Debug)]
pub struct CharsetHandler {
    names: Vec<String>,
}

impl CharsetHandler {
    /// Offers `names`, in preference order.
    pub fn new<I, S>(names: I) -> CharsetHandler
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CharsetHandler {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for CharsetHandler {
    fn default() -> Self {
        CharsetHandler::new(["UTF-8", "ISO-8859-1", "US-ASCII", "ASCII"])
    }
}

impl OptionHandler for CharsetHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::Charset
    }

    fn offer(&self) -> Option<Offer> {
        Some(Offer::Will)
    }

    fn negotiate(&self, request: Request, reply: &mut BytesMut) -> Option<TelnetEvent> {
        if request == Request::Do {
            put_subnegotiation(reply, consts::option::CHARSET, &request_payload(&self.names));
        }
        None
    }

    fn subnegotiate(&self, argument: TelnetArgument, _reply: &mut BytesMut) -> Option<TelnetEvent> {
        match argument {
            TelnetArgument::Charset(CharsetReply::Accepted(name)) => {
                debug!(charset = %name, "Client accepted charset");
                Some(TelnetEvent::Charset(CharsetChoice::from_name(&name)))
            }
            _ => None,
        }
    }
}

type StatusSource = Arc<dyn Fn() -> MudServerStatus + Send + Sync>;

/// Mud Server Status Protocol. Offered with `WILL`; `DO MSSP` gets the current variables.
#[derive(Clone)]
pub struct MsspHandler {
    source: StatusSource,
}

impl MsspHandler {
    /// Reports whatever `source` returns at the moment a client asks.
    pub fn new<F>(source: F) -> MsspHandler
    where
        F: Fn() -> MudServerStatus + Send + Sync + 'static,
    {
        MsspHandler {
            source: Arc::new(source),
        }
    }
}

impl Default for MsspHandler {
    fn default() -> Self {
        MsspHandler::new(MudServerStatus::new)
    }
}

impl std::fmt::Debug for MsspHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsspHandler").finish_non_exhaustive()
    }
}

impl OptionHandler for MsspHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::MSSP
    }

    fn offer(&self) -> Option<Offer> {
        Some(Offer::Will)
    }

    fn negotiate(&self, request: Request, reply: &mut BytesMut) -> Option<TelnetEvent> {
        if request != Request::Do {
            return None;
        }
        let status = (self.source)();
        let mut payload = BytesMut::with_capacity(status.len());
        if let Err(error) = status.encode(&mut payload) {
            warn!(%error, "Unable to encode MSSP variables");
            return None;
        }
        put_subnegotiation(reply, consts::option::MSSP, &payload);
        None
    }
}

/// GMCP. Offered with `WILL`; any agreement enables it and messages are passed through.
#[derive(Clone, Copy, Debug, Default)]
pub struct GmcpHandler;

impl OptionHandler for GmcpHandler {
    fn option(&self) -> TelnetOption {
        TelnetOption::GMCP
    }

    fn offer(&self) -> Option<Offer> {
        Some(Offer::Will)
    }

    fn negotiate(&self, _request: Request, _reply: &mut BytesMut) -> Option<TelnetEvent> {
        Some(TelnetEvent::GmcpEnabled)
    }

    fn subnegotiate(&self, argument: TelnetArgument, _reply: &mut BytesMut) -> Option<TelnetEvent> {
        match argument {
            TelnetArgument::GMCP(message) => Some(TelnetEvent::Gmcp(message)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttype_send_on_will() {
        let mut reply = BytesMut::new();
        assert!(TerminalTypeHandler.negotiate(Request::Will, &mut reply).is_none());
        assert_eq!(&reply[..], &[255, 250, 24, 1, 255, 240]);

        reply.clear();
        TerminalTypeHandler.negotiate(Request::Do, &mut reply);
        assert!(reply.is_empty());
    }

    #[test]
    fn test_linemode_edit_soft_tab() {
        let mut reply = BytesMut::new();
        LinemodeHandler.negotiate(Request::Will, &mut reply);
        assert_eq!(&reply[..], &[255, 250, 34, 1, 9, 255, 240]);
    }

    #[test]
    fn test_charset_request_list() {
        let mut reply = BytesMut::new();
        CharsetHandler::new(["UTF-8", "ASCII"]).negotiate(Request::Do, &mut reply);
        let mut expected = vec![255, 250, 42, 1];
        expected.extend_from_slice(b";UTF-8;ASCII");
        expected.extend_from_slice(&[255, 240]);
        assert_eq!(&reply[..], &expected[..]);
    }

    #[test]
    fn test_charset_accepted_event() {
        let mut reply = BytesMut::new();
        let event = CharsetHandler::default().subnegotiate(
            TelnetArgument::Charset(CharsetReply::Accepted("US-ASCII".to_string())),
            &mut reply,
        );
        assert_eq!(event, Some(TelnetEvent::Charset(CharsetChoice::Ascii)));
    }

    #[test]
    fn test_mssp_reports_source() {
        let handler = MsspHandler::new(|| {
            let mut status = MudServerStatus::new();
            status.add("NAME", "M");
            status
        });
        let mut reply = BytesMut::new();
        handler.negotiate(Request::Do, &mut reply);
        assert_eq!(&reply[..], b"\xff\xfa\x46\x01NAME\x02M\xff\xf0");
    }

    #[test]
    fn test_sga_only_on_do() {
        let mut reply = BytesMut::new();
        assert!(SuppressGoAheadHandler.negotiate(Request::Will, &mut reply).is_none());
        assert!(reply.is_empty());
    }
}
