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
use bytes::Bytes;

///
/// Wire-level Telnet frame produced by [`TelnetCodec`](crate::TelnetCodec) decoding and
/// accepted by its encoder.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetFrame {
    /// A data byte. `IAC IAC` decodes to `Data(255)`.
    Data(u8),
    /// `IAC NOP`
    NoOperation,
    /// `IAC AYT`
    AreYouThere,
    /// `IAC EC`
    EraseCharacter,
    /// `IAC EL`
    EraseLine,
    /// Any other two byte command (`DM`, `BRK`, `IP`, `AO`, `GA`, `EOR`).
    Command(u8),
    /// `IAC DO <option>`
    Do(TelnetOption),
    /// `IAC DONT <option>`
    Dont(TelnetOption),
    /// `IAC WILL <option>`
    Will(TelnetOption),
    /// `IAC WONT <option>`
    Wont(TelnetOption),
    /// `IAC SB <option> <payload> IAC SE`, payload already de-escaped.
    Subnegotiate(TelnetOption, Bytes),
    /// A byte that followed `IAC` but forms no valid command. Callers treat it as
    /// literal data rather than dropping it.
    Invalid(u8),
}
