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

use crate::charset::CharsetChoice;
use crate::gmcp::GmcpMessage;
use crate::naws::WindowSize;

///
/// `TelnetEvent` is the session-facing outcome of an option handler. Handlers never mutate
/// the connection; they report what changed and the owner applies it.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Client agreed to suppress go-ahead; prompts should end with a newline.
    PromptNewlines,
    /// Client reported its terminal type.
    TerminalType(String),
    /// Client reported its window size.
    WindowSize(WindowSize),
    /// Client accepted one of the offered character sets.
    Charset(CharsetChoice),
    /// Client agreed to GMCP.
    GmcpEnabled,
    /// Client sent a GMCP message.
    Gmcp(GmcpMessage),
}
