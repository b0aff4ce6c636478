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

//! Mud Server Status Protocol
//!
//! The server answers `DO MSSP` with `IAC SB MSSP (VAR key (VAL value)+)+ IAC SE`. Keys and
//! values are emitted in insertion order.
//!
use crate::{TelnetCodecResult, consts};
use byteorder::WriteBytesExt;
use bytes::BufMut;

/// Ordered MSSP variables.
///
/// ```
/// use netmush_telnetcodec::mssp::MudServerStatus;
///
/// let mut status = MudServerStatus::new();
/// status.add("NAME", "Example MUSH");
/// status.add("PLAYERS", "3");
/// assert_eq!(status.len(), 28);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MudServerStatus(Vec<(String, Vec<String>)>);

impl MudServerStatus {
    /// Creates an empty variable list.
    pub fn new() -> MudServerStatus {
        MudServerStatus(Vec::new())
    }

    /// Appends `value` to `key`, creating the key at the end of the list when new.
    pub fn add<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => values.push(value),
            None => self.0.push((key, vec![value])),
        }
        self
    }

    /// Number of distinct keys.
    pub fn keys(&self) -> usize {
        self.0.len()
    }

    /// True when no variables are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded length before filtering.
    pub fn len(&self) -> usize {
        self.0
            .iter()
            .map(|(key, values)| 1 + key.len() + values.iter().map(|v| 1 + v.len()).sum::<usize>())
            .sum()
    }

    /// Encodes the variables into `dst`.
    pub fn encode<T: BufMut>(&self, dst: &mut T) -> TelnetCodecResult<usize> {
        Ok(self.write(&mut dst.writer())?)
    }

    /// Writes the variables, dropping `NUL`, `IAC`, `VAR` and `VAL` bytes from keys and values.
    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        let mut len = 0;
        for (key, values) in &self.0 {
            writer.write_u8(consts::option::mssp::VAR)?;
            len += 1 + write_filtered(writer, key)?;
            for value in values {
                writer.write_u8(consts::option::mssp::VAL)?;
                len += 1 + write_filtered(writer, value)?;
            }
        }
        Ok(len)
    }
}

fn write_filtered<W: std::io::Write>(writer: &mut W, text: &str) -> std::io::Result<usize> {
    let filtered: Vec<u8> = text
        .bytes()
        .filter(|byte| {
            !matches!(
                *byte,
                consts::NUL | consts::IAC | consts::option::mssp::VAR | consts::option::mssp::VAL
            )
        })
        .collect();
    writer.write_all(&filtered)?;
    Ok(filtered.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_encode_in_insertion_order() {
        let mut status = MudServerStatus::new();
        status.add("NAME", "Test").add("PORT", "4201").add("PORT", "4202");
        let mut buffer = BytesMut::new();
        let written = status.encode(&mut buffer).unwrap();
        assert_eq!(
            &buffer[..],
            b"\x01NAME\x02Test\x01PORT\x024201\x024202"
        );
        assert_eq!(written, buffer.len());
        assert_eq!(status.keys(), 2);
    }

    #[test]
    fn test_encode_filters_reserved_bytes() {
        let mut status = MudServerStatus::new();
        status.add("N\x01AME", "a\x02b\x00c");
        let mut buffer = Vec::new();
        status.write(&mut buffer).unwrap();
        assert_eq!(&buffer[..], b"\x01NAME\x02abc");
    }
}
