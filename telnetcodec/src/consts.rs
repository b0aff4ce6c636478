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

//! Telnet protocol byte values.

/// Null
pub const NUL: u8 = 0;
/// Backspace
pub const BS: u8 = 8;
/// Line Feed
pub const LF: u8 = 10;
/// Carriage Return
pub const CR: u8 = 13;
/// Delete
pub const DEL: u8 = 127;

/// End of Record
pub const EOR: u8 = 239;
/// End of Subnegotiation
pub const SE: u8 = 240;
/// No Operation
pub const NOP: u8 = 241;
/// Data Mark
pub const DM: u8 = 242;
/// Break
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
pub const GA: u8 = 249;
/// Begin Subnegotiation
pub const SB: u8 = 250;
/// Sender wants to enable an option locally
pub const WILL: u8 = 251;
/// Sender refuses to enable an option locally
pub const WONT: u8 = 252;
/// Sender asks the receiver to enable an option
pub const DO: u8 = 253;
/// Sender asks the receiver not to enable an option
pub const DONT: u8 = 254;
/// Interpret As Command
pub const IAC: u8 = 255;

/// Option codes
pub mod option {
    /// Binary Transmission [RFC856]
    pub const BINARY: u8 = 0;
    /// Echo [RFC857]
    pub const ECHO: u8 = 1;
    /// Suppress Go Ahead [RFC858]
    pub const SGA: u8 = 3;
    /// Terminal Type [RFC1091]
    pub const TTYPE: u8 = 24;
    /// End of Record [RFC885]
    pub const EOR: u8 = 25;
    /// Negotiate About Window Size [RFC1073]
    pub const NAWS: u8 = 31;
    /// Linemode [RFC1184]
    pub const LINEMODE: u8 = 34;
    /// Charset [RFC2066]
    pub const CHARSET: u8 = 42;
    /// Mud Server Status Protocol
    pub const MSSP: u8 = 70;
    /// Generic Mud Communication Protocol
    pub const GMCP: u8 = 201;

    /// Terminal type subnegotiation commands
    pub mod ttype {
        /// `IS <name>`
        pub const IS: u8 = 0;
        /// `SEND`
        pub const SEND: u8 = 1;
    }

    /// Linemode subnegotiation values
    pub mod linemode {
        /// `MODE` subcommand
        pub const MODE: u8 = 1;
        /// Client-side line editing
        pub const MODE_EDIT: u8 = 0x01;
        /// Client converts tabs to spaces
        pub const MODE_SOFT_TAB: u8 = 0x08;
    }

    /// Charset subnegotiation commands
    pub mod charset {
        /// `REQUEST <sep><name>...`
        pub const REQUEST: u8 = 1;
        /// `ACCEPTED <name>`
        pub const ACCEPTED: u8 = 2;
        /// `REJECTED`
        pub const REJECTED: u8 = 3;
    }

    /// MSSP markers
    pub mod mssp {
        /// Variable name follows
        pub const VAR: u8 = 1;
        /// Variable value follows
        pub const VAL: u8 = 2;
    }
}
