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

//! # netmush Telnet Codec
//!
//! Byte-level Telnet handling for the netmush connection front-end. The crate is split in two
//! layers:
//!
//! - [`TelnetCodec`] implements [`Decoder`](tokio_util::codec::Decoder) and
//!   [`Encoder`](tokio_util::codec::Encoder) over [`TelnetFrame`]s. It is a resumable state
//!   machine: a command split across two reads (including a lone trailing `IAC`) leaves the
//!   codec mid-sequence and the next read continues where the previous one stopped.
//! - [`OptionTable`] is the process-wide option descriptor table. Every supported option has
//!   an optional connect-time offer (`DO` or `WILL`), a negotiation handler and a
//!   subnegotiation handler. The concatenated offers are cached once in
//!   [`OptionTable::offers`] so new sessions receive them verbatim.
//!
//! Handlers never touch connection state directly. They append any reply bytes to a buffer
//! supplied by the caller and return a [`TelnetEvent`] describing what the session should
//! change (terminal type, window size, charset and so on).
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use netmush_telnetcodec::{OptionTable, TelnetCodec, TelnetFrame, consts};
//! use tokio_util::codec::Decoder;
//!
//! let table = OptionTable::standard();
//! let mut codec = TelnetCodec::new();
//! let mut input = BytesMut::from(&[consts::IAC, consts::WILL, consts::option::TTYPE][..]);
//! let mut reply = BytesMut::new();
//! if let Some(TelnetFrame::Will(option)) = codec.decode(&mut input).unwrap() {
//!     table.negotiate(netmush_telnetcodec::Request::Will, option, &mut reply);
//! }
//! // IAC SB TTYPE SEND IAC SE
//! assert_eq!(&reply[..], &[255, 250, 24, 1, 255, 240]);
//! ```
//!
//! ## Supported options
//!
//! | Option   | Offer | On `DO`/`WILL`                       | Subnegotiation               |
//! |----------|-------|--------------------------------------|------------------------------|
//! | SGA      | -     | `WILL SGA DO SGA`, prompt newlines   | -                            |
//! | TTYPE    | DO    | `SB TTYPE SEND`                      | `IS <name>`                  |
//! | NAWS     | DO    | -                                    | width/height                 |
//! | LINEMODE | -     | `SB LINEMODE MODE EDIT\|SOFT_TAB`    | -                            |
//! | CHARSET  | WILL  | `SB CHARSET REQUEST <list>`          | `ACCEPTED <name>`            |
//! | MSSP     | WILL  | `SB MSSP <variables>`                | -                            |
//! | GMCP     | WILL  | enables GMCP                         | `<package> [json]`           |
//!
//! Options missing from the table are refused with `WONT`/`DONT`.

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod args;
mod codec;
pub mod consts;
mod event;
mod frame;
mod handlers;
mod options;
mod result;
mod table;

pub use self::args::{TelnetArgument, charset, gmcp, mssp, naws, ttype};
pub use self::codec::{TelnetCodec, escape_iac};
pub use self::event::TelnetEvent;
pub use self::frame::TelnetFrame;
pub use self::handlers::{
    CharsetHandler, GmcpHandler, LinemodeHandler, MsspHandler, NawsHandler,
    SuppressGoAheadHandler, TerminalTypeHandler,
};
pub use self::options::TelnetOption;
pub use self::result::{SubnegotiationErrorKind, TelnetCodecError, TelnetCodecResult};
pub use self::table::{
    NegotiatedOptions, Negotiation, Offer, OptionHandler, OptionTable, OptionTableBuilder, Request,
};
