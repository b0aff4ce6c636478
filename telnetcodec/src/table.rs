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

use crate::handlers::{
    CharsetHandler, GmcpHandler, LinemodeHandler, MsspHandler, NawsHandler,
    SuppressGoAheadHandler, TerminalTypeHandler,
};
use crate::{TelnetArgument, TelnetCodecResult, TelnetEvent, TelnetOption, consts};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// The negotiation a client sent, `IAC DO <opt>` or `IAC WILL <opt>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Request {
    /// Client asks the server to enable the option.
    Do,
    /// Client offers to enable the option itself.
    Will,
}

impl Request {
    /// The refusal for this request: `WONT` answers `DO`, `DONT` answers `WILL`.
    pub fn refusal(self) -> u8 {
        match self {
            Request::Do => consts::WONT,
            Request::Will => consts::DONT,
        }
    }
}

/// What the server proactively sends for an option when a session opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Offer {
    /// `IAC DO <opt>`
    Do,
    /// `IAC WILL <opt>`
    Will,
}

impl Offer {
    fn command(self) -> u8 {
        match self {
            Offer::Do => consts::DO,
            Offer::Will => consts::WILL,
        }
    }
}

/// Per-option behavior. Handlers are shared by every session and hold no session state;
/// replies are appended to `reply` and state changes are reported as a [`TelnetEvent`].
pub trait OptionHandler: Send + Sync {
    /// The option this handler answers for.
    fn option(&self) -> TelnetOption;

    /// The offer sent to new sessions, if any.
    fn offer(&self) -> Option<Offer> {
        None
    }

    /// Reacts to `IAC DO|WILL <opt>`.
    fn negotiate(&self, request: Request, reply: &mut BytesMut) -> Option<TelnetEvent>;

    /// Reacts to a decoded `IAC SB <opt> ... IAC SE`.
    fn subnegotiate(&self, argument: TelnetArgument, reply: &mut BytesMut) -> Option<TelnetEvent> {
        let _ = (argument, reply);
        None
    }
}

/// Outcome of [`OptionTable::negotiate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Negotiation {
    /// The option is not in the table and a `WONT`/`DONT` was queued.
    Refused,
    /// The option's handler ran.
    Handled(Option<TelnetEvent>),
}

impl Negotiation {
    /// The event the handler produced, if any.
    pub fn event(&self) -> Option<&TelnetEvent> {
        match self {
            Negotiation::Handled(event) => event.as_ref(),
            Negotiation::Refused => None,
        }
    }

    /// True when the option was refused.
    pub fn is_refused(&self) -> bool {
        matches!(self, Negotiation::Refused)
    }
}

///
/// Process-wide table of supported options.
///
/// Built once at startup and read-only afterwards. The offers of every option are
/// concatenated in option-code order and cached, so opening a session costs one buffer copy.
///
pub struct OptionTable {
    handlers: BTreeMap<u8, Box<dyn OptionHandler>>,
    offers: Bytes,
}

impl OptionTable {
    /// Starts an empty table.
    pub fn builder() -> OptionTableBuilder {
        OptionTableBuilder::default()
    }

    /// The table used by the server: SGA, TTYPE, NAWS, LINEMODE, CHARSET, MSSP (empty) and
    /// GMCP.
    pub fn standard() -> OptionTable {
        OptionTable::builder()
            .handler(SuppressGoAheadHandler)
            .handler(TerminalTypeHandler)
            .handler(NawsHandler)
            .handler(LinemodeHandler)
            .handler(CharsetHandler::default())
            .handler(MsspHandler::default())
            .handler(GmcpHandler)
            .build()
    }

    /// The cached offer bytes for new sessions.
    pub fn offers(&self) -> &Bytes {
        &self.offers
    }

    /// True when `option` has a handler.
    pub fn contains(&self, option: TelnetOption) -> bool {
        self.handlers.contains_key(&option.to_u8())
    }

    /// Number of registered options.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no options are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatches `IAC DO|WILL <option>`. Unknown options are refused.
    pub fn negotiate(&self, request: Request, option: TelnetOption, reply: &mut BytesMut) -> Negotiation {
        match self.handlers.get(&option.to_u8()) {
            Some(handler) => {
                trace!(?request, %option, "Negotiating option");
                Negotiation::Handled(handler.negotiate(request, reply))
            }
            None => {
                debug!(?request, %option, "Refusing unsupported option");
                reply.reserve(3);
                reply.put_u8(consts::IAC);
                reply.put_u8(request.refusal());
                reply.put_u8(option.to_u8());
                Negotiation::Refused
            }
        }
    }

    /// Dispatches a completed subnegotiation. Payloads for unknown options are ignored;
    /// payloads that fail to decode are reported as errors and change nothing.
    pub fn subnegotiate(
        &self,
        option: TelnetOption,
        payload: Bytes,
        reply: &mut BytesMut,
    ) -> TelnetCodecResult<Option<TelnetEvent>> {
        let Some(handler) = self.handlers.get(&option.to_u8()) else {
            trace!(%option, "Ignoring subnegotiation for unsupported option");
            return Ok(None);
        };
        let argument = TelnetArgument::decode(option, payload)?;
        Ok(handler.subnegotiate(argument, reply))
    }
}

impl fmt::Debug for OptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionTable")
            .field("options", &self.handlers.keys().collect::<Vec<_>>())
            .field("offers", &self.offers)
            .finish()
    }
}

/// Collects handlers for an [`OptionTable`]. A later handler for the same option replaces
/// the earlier one.
#[derive(Default)]
pub struct OptionTableBuilder {
    handlers: BTreeMap<u8, Box<dyn OptionHandler>>,
}

impl OptionTableBuilder {
    /// Registers `handler`.
    #[must_use]
    pub fn handler<H: OptionHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.option().to_u8(), Box::new(handler));
        self
    }

    /// Freezes the table and caches the offer buffer.
    pub fn build(self) -> OptionTable {
        let mut offers = BytesMut::new();
        for (code, handler) in &self.handlers {
            if let Some(offer) = handler.offer() {
                offers.put_u8(consts::IAC);
                offers.put_u8(offer.command());
                offers.put_u8(*code);
            }
        }
        OptionTable {
            handlers: self.handlers,
            offers: offers.freeze(),
        }
    }
}

/// Per-session record of options whose negotiation handler already ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NegotiatedOptions([u64; 4]);

impl NegotiatedOptions {
    /// Marks `option`, returning `true` only the first time.
    pub fn mark(&mut self, option: TelnetOption) -> bool {
        let code = option.to_u8() as usize;
        let bit = 1u64 << (code % 64);
        let word = &mut self.0[code / 64];
        let first = *word & bit == 0;
        *word |= bit;
        first
    }

    /// True when `option` was marked.
    pub fn contains(&self, option: TelnetOption) -> bool {
        let code = option.to_u8() as usize;
        self.0[code / 64] & (1u64 << (code % 64)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_offers_in_code_order() {
        let table = OptionTable::standard();
        assert_eq!(
            &table.offers()[..],
            &[
                consts::IAC,
                consts::DO,
                consts::option::TTYPE,
                consts::IAC,
                consts::DO,
                consts::option::NAWS,
                consts::IAC,
                consts::WILL,
                consts::option::CHARSET,
                consts::IAC,
                consts::WILL,
                consts::option::MSSP,
                consts::IAC,
                consts::WILL,
                consts::option::GMCP,
            ]
        );
        assert_eq!(table.len(), 7);
    }

    #[test]
    fn test_refusal_direction() {
        let table = OptionTable::builder().build();
        let mut reply = BytesMut::new();
        assert!(table.negotiate(Request::Do, TelnetOption::Echo, &mut reply).is_refused());
        assert_eq!(&reply[..], &[consts::IAC, consts::WONT, consts::option::ECHO]);
        assert!(table.offers().is_empty());
    }

    #[test]
    fn test_known_option_without_reply() {
        let table = OptionTable::standard();
        let mut reply = BytesMut::new();
        let outcome = table.negotiate(Request::Will, TelnetOption::NAWS, &mut reply);
        assert_eq!(outcome, Negotiation::Handled(None));
        assert!(reply.is_empty());
    }

    #[test]
    fn test_subnegotiate_window_size() {
        let table = OptionTable::standard();
        let mut reply = BytesMut::new();
        let event = table
            .subnegotiate(TelnetOption::NAWS, Bytes::from_static(&[0, 100, 0, 40]), &mut reply)
            .unwrap();
        assert_eq!(
            event,
            Some(TelnetEvent::WindowSize(crate::naws::WindowSize::new(100, 40)))
        );
    }

    #[test]
    fn test_subnegotiate_unknown_is_ignored() {
        let table = OptionTable::standard();
        let mut reply = BytesMut::new();
        let event = table
            .subnegotiate(TelnetOption::Unknown(93), Bytes::from_static(b"xyz"), &mut reply)
            .unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_negotiated_options_mark_once() {
        let mut seen = NegotiatedOptions::default();
        assert!(seen.mark(TelnetOption::TTYPE));
        assert!(!seen.mark(TelnetOption::TTYPE));
        assert!(seen.contains(TelnetOption::TTYPE));
        assert!(seen.mark(TelnetOption::GMCP));
        assert!(!seen.contains(TelnetOption::NAWS));
    }
}
