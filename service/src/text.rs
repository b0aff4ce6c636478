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

//! Character set conversion between sessions and the interpreter
//!
//! The interpreter always works with Rust strings. A session either speaks UTF-8, Latin-1
//! (the classic default), or ASCII with accents folded away.

/// Wire encoding of a session's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// One byte per character; characters above U+00FF become `?`
    #[default]
    Latin1,
    /// UTF-8 in both directions
    Utf8,
    /// Latin-1 letters folded to their unaccented ASCII form
    Ascii,
}

/// Decode a received line. Returns `None` for invalid UTF-8 on a UTF-8 session.
pub fn decode_line(bytes: Vec<u8>, encoding: TextEncoding) -> Option<String> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes).ok(),
        TextEncoding::Latin1 | TextEncoding::Ascii => Some(bytes.into_iter().map(char::from).collect()),
    }
}

/// Encode `text` for the wire, appending to `dst`
pub fn encode_text(text: &str, encoding: TextEncoding, dst: &mut Vec<u8>) {
    match encoding {
        TextEncoding::Utf8 => dst.extend_from_slice(text.as_bytes()),
        TextEncoding::Latin1 => dst.extend(text.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))),
        TextEncoding::Ascii => dst.extend(text.chars().map(fold_accent)),
    }
}

/// The ASCII form of a Latin-1 character, `?` for anything else outside ASCII
pub fn fold_accent(c: char) -> u8 {
    if c.is_ascii() {
        return c as u8;
    }
    match c {
        '\u{a0}' => b' ',
        '\u{a1}' => b'!',
        '\u{ab}' => b'<',
        '\u{bb}' => b'>',
        '\u{bf}' => b'?',
        'À'..='Å' => b'A',
        'Ç' => b'C',
        'È'..='Ë' => b'E',
        'Ì'..='Ï' => b'I',
        'Ð' => b'D',
        'Ñ' => b'N',
        'Ò'..='Ö' | 'Ø' => b'O',
        '×' => b'x',
        'Ù'..='Ü' => b'U',
        'Ý' => b'Y',
        'Þ' => b'P',
        'þ' => b'p',
        'ß' => b's',
        'à'..='å' => b'a',
        'ç' => b'c',
        'è'..='ë' => b'e',
        'ì'..='ï' => b'i',
        'ð' => b'd',
        'ñ' => b'n',
        'ò'..='ö' | 'ø' => b'o',
        '÷' => b'/',
        'ù'..='ü' => b'u',
        'ý' | 'ÿ' => b'y',
        _ => b'?',
    }
}
