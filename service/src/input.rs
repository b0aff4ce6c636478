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

//! Command line assembly

/// Longest command line; further bytes on the same line are dropped
pub const MAX_COMMAND_LEN: usize = 4096;

const BACKSPACE: u8 = 0x08;

/// Turns a byte stream into command lines.
///
/// CR or LF ends a line and a CR LF pair counts once. Empty lines are skipped. Only
/// printable bytes are kept: ASCII graphic characters plus Latin-1 letters, or any byte of a
/// multibyte sequence when the session speaks UTF-8.
#[derive(Debug, Clone, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
    after_cr: bool,
}

impl LineAssembler {
    /// An empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte, returning the line it completed
    pub fn push(&mut self, byte: u8, utf8: bool) -> Option<Vec<u8>> {
        let after_cr = std::mem::replace(&mut self.after_cr, byte == b'\r');
        match byte {
            b'\n' if after_cr => None,
            b'\r' | b'\n' => self.take_line(),
            BACKSPACE => {
                self.partial.pop();
                None
            }
            _ if is_printable(byte, utf8) => {
                if self.partial.len() < MAX_COMMAND_LEN {
                    self.partial.push(byte);
                }
                None
            }
            _ => None,
        }
    }

    /// Feed a run of bytes, collecting completed lines
    pub fn extend(&mut self, bytes: &[u8], utf8: bool, lines: &mut Vec<Vec<u8>>) {
        for &byte in bytes {
            if let Some(line) = self.push(byte, utf8) {
                lines.push(line);
            }
        }
    }

    /// Telnet erase-character
    pub fn erase_char(&mut self) {
        self.partial.pop();
    }

    /// Telnet erase-line
    pub fn erase_line(&mut self) {
        self.partial.clear();
    }

    /// True when no partial line is held
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Drop the partial line
    pub fn clear(&mut self) {
        self.partial.clear();
        self.after_cr = false;
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

fn is_printable(byte: u8, utf8: bool) -> bool {
    match byte {
        0x20..=0x7E => true,
        0x80..=0x9F => utf8,
        0xA0..=0xFF => true,
        _ => false,
    }
}
