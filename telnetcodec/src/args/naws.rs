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

//! Negotiate About Window Size
//!

use crate::{SubnegotiationErrorKind, TelnetCodecError, TelnetCodecResult, consts};
use byteorder::{BigEndian, WriteBytesExt};
use bytes::{Buf, BufMut};

/// Terminal geometry carried by a NAWS subnegotiation.
///
/// On the wire this is four bytes, width then height, each a big-endian `u16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSize {
    /// Columns
    pub width: u16,
    /// Rows
    pub height: u16,
}

impl WindowSize {
    /// Creates a new `WindowSize`.
    pub fn new(width: u16, height: u16) -> Self {
        WindowSize { width, height }
    }

    /// Encodes the four byte NAWS payload into `dst`.
    pub fn encode<T: BufMut>(&self, dst: &mut T) -> TelnetCodecResult<usize> {
        let mut writer = dst.writer();
        writer.write_u16::<BigEndian>(self.width)?;
        writer.write_u16::<BigEndian>(self.height)?;
        Ok(4)
    }

    /// Decodes a NAWS payload.
    ///
    /// # Errors
    /// Returns `SubnegotiationError` with `InsufficientData` when fewer than four bytes remain.
    pub fn decode<T: Buf>(src: &mut T) -> TelnetCodecResult<WindowSize> {
        if src.remaining() < 4 {
            return Err(TelnetCodecError::SubnegotiationError {
                option: Some(consts::option::NAWS),
                reason: SubnegotiationErrorKind::InsufficientData {
                    required: 4,
                    available: src.remaining(),
                },
            });
        }
        Ok(WindowSize {
            width: src.get_u16(),
            height: src.get_u16(),
        })
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_decode_big_endian() {
        let mut buf = BytesMut::from(&[0x01, 0x00, 0x00, 0x18][..]);
        assert_eq!(WindowSize::decode(&mut buf).unwrap(), WindowSize::new(256, 24));
    }

    #[test]
    fn test_encode() {
        let mut buf = BytesMut::new();
        assert_eq!(WindowSize::new(80, 24).encode(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..], &[0, 80, 0, 24]);
    }

    #[test]
    fn test_display() {
        assert_eq!(WindowSize::new(132, 43).to_string(), "132x43");
    }
}
