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

use super::{TelnetCodecError, TelnetFrame, TelnetOption, consts};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{trace, warn};

/// Default cap on a single subnegotiation payload.
pub const DEFAULT_SUBNEGOTIATION_LIMIT: usize = 8192;

/// A resumable codec for the Telnet protocol.
///
/// Decoding is byte oriented and keeps its position inside a command between calls, so a
/// sequence split across reads is completed by the next read instead of being rejected.
/// [`TelnetCodec::is_incomplete`] reports whether the codec is currently parked inside such
/// a sequence.
///
/// Bytes that follow an `IAC` without forming a valid command are surfaced as
/// [`TelnetFrame::Invalid`] so the caller can keep them as literal data.
#[derive(Debug)]
pub struct TelnetCodec {
    decoder_buffer: BytesMut,
    decoder_state: DecoderState,
    subnegotiation_limit: usize,
    overflowed: bool,
}

impl TelnetCodec {
    /// Creates a codec with the default subnegotiation limit.
    pub fn new() -> TelnetCodec {
        TelnetCodec::default()
    }

    /// Creates a codec that discards subnegotiation payloads longer than `limit` bytes.
    pub fn with_subnegotiation_limit(limit: usize) -> TelnetCodec {
        TelnetCodec {
            subnegotiation_limit: limit,
            ..TelnetCodec::default()
        }
    }

    /// True while the decoder sits inside an unfinished command (`IAC`, a negotiation
    /// missing its option byte, or a subnegotiation still waiting for `IAC SE`).
    pub fn is_incomplete(&self) -> bool {
        self.decoder_state != DecoderState::NormalData
    }

    /// Drops any partial command and returns to plain data.
    pub fn reset(&mut self) {
        self.decoder_state = DecoderState::NormalData;
        self.decoder_buffer.clear();
        self.overflowed = false;
    }

    fn push_subnegotiation(&mut self, byte: u8) {
        if self.decoder_buffer.len() >= self.subnegotiation_limit {
            self.overflowed = true;
        } else {
            self.decoder_buffer.put_u8(byte);
        }
    }
}

impl Default for TelnetCodec {
    fn default() -> Self {
        TelnetCodec {
            decoder_buffer: BytesMut::new(),
            decoder_state: DecoderState::NormalData,
            subnegotiation_limit: DEFAULT_SUBNEGOTIATION_LIMIT,
            overflowed: false,
        }
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetFrame;
    type Error = TelnetCodecError;

    /// Decodes the next frame from `src`.
    ///
    /// Returns `Ok(None)` once `src` is drained. If that happens mid-command the partial state
    /// is retained and [`TelnetCodec::is_incomplete`] returns `true`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TelnetFrame>, Self::Error> {
        while src.remaining() > 0 {
            let byte = src.get_u8();
            match (self.decoder_state, byte) {
                (DecoderState::NormalData, consts::IAC) => {
                    self.decoder_state = DecoderState::InterpretAsCommand;
                }
                (DecoderState::NormalData, _) => {
                    return Ok(Some(TelnetFrame::Data(byte)));
                }
                (DecoderState::InterpretAsCommand, consts::IAC) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Data(consts::IAC)));
                }
                (DecoderState::InterpretAsCommand, consts::NOP) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::NoOperation));
                }
                (DecoderState::InterpretAsCommand, consts::AYT) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::AreYouThere));
                }
                (DecoderState::InterpretAsCommand, consts::EC) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::EraseCharacter));
                }
                (DecoderState::InterpretAsCommand, consts::EL) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::EraseLine));
                }
                (
                    DecoderState::InterpretAsCommand,
                    consts::DM | consts::BRK | consts::IP | consts::AO | consts::GA | consts::EOR,
                ) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Command(byte)));
                }
                (DecoderState::InterpretAsCommand, consts::DO) => {
                    self.decoder_state = DecoderState::NegotiateDo;
                }
                (DecoderState::InterpretAsCommand, consts::DONT) => {
                    self.decoder_state = DecoderState::NegotiateDont;
                }
                (DecoderState::InterpretAsCommand, consts::WILL) => {
                    self.decoder_state = DecoderState::NegotiateWill;
                }
                (DecoderState::InterpretAsCommand, consts::WONT) => {
                    self.decoder_state = DecoderState::NegotiateWont;
                }
                (DecoderState::InterpretAsCommand, consts::SB) => {
                    self.decoder_state = DecoderState::Subnegotiate;
                }
                (DecoderState::InterpretAsCommand, _) => {
                    trace!("Byte {:#X} after IAC is not a command", byte);
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Invalid(byte)));
                }
                (DecoderState::NegotiateDo, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Do(TelnetOption::from_u8(byte))));
                }
                (DecoderState::NegotiateDont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Dont(TelnetOption::from_u8(byte))));
                }
                (DecoderState::NegotiateWill, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Will(TelnetOption::from_u8(byte))));
                }
                (DecoderState::NegotiateWont, _) => {
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Wont(TelnetOption::from_u8(byte))));
                }
                (DecoderState::Subnegotiate, _) => {
                    self.decoder_buffer.clear();
                    self.overflowed = false;
                    self.decoder_state = DecoderState::SubnegotiateArgument(byte);
                }
                (DecoderState::SubnegotiateArgument(option), consts::IAC) => {
                    self.decoder_state = DecoderState::SubnegotiateArgumentIAC(option);
                }
                (DecoderState::SubnegotiateArgument(_), _) => {
                    self.push_subnegotiation(byte);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::IAC) => {
                    self.push_subnegotiation(consts::IAC);
                    self.decoder_state = DecoderState::SubnegotiateArgument(option);
                }
                (DecoderState::SubnegotiateArgumentIAC(option), consts::SE) => {
                    self.decoder_state = DecoderState::NormalData;
                    let payload = self.decoder_buffer.split().freeze();
                    if self.overflowed {
                        self.overflowed = false;
                        warn!(
                            "Discarding subnegotiation for option {} over {} bytes",
                            option, self.subnegotiation_limit
                        );
                        return Ok(Some(TelnetFrame::NoOperation));
                    }
                    return Ok(Some(TelnetFrame::Subnegotiate(
                        TelnetOption::from_u8(option),
                        payload,
                    )));
                }
                (DecoderState::SubnegotiateArgumentIAC(option), _) => {
                    warn!(
                        "Aborting subnegotiation for option {}: unexpected {:#X} after IAC",
                        option, byte
                    );
                    self.decoder_buffer.clear();
                    self.overflowed = false;
                    self.decoder_state = DecoderState::NormalData;
                    return Ok(Some(TelnetFrame::Invalid(byte)));
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<TelnetFrame> for TelnetCodec {
    type Error = TelnetCodecError;

    fn encode(&mut self, frame: TelnetFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            TelnetFrame::Data(byte) | TelnetFrame::Invalid(byte) => {
                if byte == consts::IAC {
                    dst.reserve(2);
                    dst.put_u8(consts::IAC);
                } else {
                    dst.reserve(1);
                }
                dst.put_u8(byte);
            }
            TelnetFrame::NoOperation => encode_command(dst, consts::NOP),
            TelnetFrame::AreYouThere => encode_command(dst, consts::AYT),
            TelnetFrame::EraseCharacter => encode_command(dst, consts::EC),
            TelnetFrame::EraseLine => encode_command(dst, consts::EL),
            TelnetFrame::Command(command) => encode_command(dst, command),
            TelnetFrame::Do(option) => encode_negotiation(dst, consts::DO, option),
            TelnetFrame::Dont(option) => encode_negotiation(dst, consts::DONT, option),
            TelnetFrame::Will(option) => encode_negotiation(dst, consts::WILL, option),
            TelnetFrame::Wont(option) => encode_negotiation(dst, consts::WONT, option),
            TelnetFrame::Subnegotiate(option, payload) => {
                dst.reserve(payload.len() + 5);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SB);
                dst.put_u8(option.to_u8());
                escape_iac(&payload, dst);
                dst.put_u8(consts::IAC);
                dst.put_u8(consts::SE);
            }
        }
        Ok(())
    }
}

fn encode_command(dst: &mut BytesMut, command: u8) {
    dst.reserve(2);
    dst.put_u8(consts::IAC);
    dst.put_u8(command);
}

fn encode_negotiation(dst: &mut BytesMut, verb: u8, option: TelnetOption) {
    dst.reserve(3);
    dst.put_u8(consts::IAC);
    dst.put_u8(verb);
    dst.put_u8(option.to_u8());
}

/// Appends `src` to `dst`, doubling every `IAC` byte.
pub fn escape_iac(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(src.len());
    let mut rest = src;
    while let Some(index) = rest.iter().position(|b| *b == consts::IAC) {
        dst.extend_from_slice(&rest[..=index]);
        dst.put_u8(consts::IAC);
        rest = &rest[index + 1..];
    }
    dst.extend_from_slice(rest);
}

///
/// Telnet decoder position.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DecoderState {
    NormalData,
    InterpretAsCommand,
    NegotiateDo,
    NegotiateDont,
    NegotiateWill,
    NegotiateWont,
    Subnegotiate,
    SubnegotiateArgument(u8),
    SubnegotiateArgumentIAC(u8),
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn collect_all(codec: &mut TelnetCodec, src: &mut BytesMut) -> Vec<TelnetFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn encode_frame(frame: TelnetFrame) -> BytesMut {
        let mut codec = TelnetCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(frame, &mut dst).unwrap();
        dst
    }

    #[test]
    fn test_lone_iac_is_incomplete() {
        let mut codec = TelnetCodec::new();
        let mut src = BytesMut::from(&[b'a', consts::IAC][..]);
        assert_eq!(collect_all(&mut codec, &mut src), vec![TelnetFrame::Data(b'a')]);
        assert!(codec.is_incomplete());

        let mut next = BytesMut::from(&[consts::IAC, b'b'][..]);
        assert_eq!(
            collect_all(&mut codec, &mut next),
            vec![TelnetFrame::Data(consts::IAC), TelnetFrame::Data(b'b')]
        );
        assert!(!codec.is_incomplete());
    }

    #[test]
    fn test_subnegotiation_resumes_across_reads() {
        let mut codec = TelnetCodec::new();
        let mut first = BytesMut::from(&[consts::IAC, consts::SB, consts::option::NAWS, 0, 80][..]);
        assert!(collect_all(&mut codec, &mut first).is_empty());
        assert!(codec.is_incomplete());

        let mut second = BytesMut::from(&[0, 24, consts::IAC][..]);
        assert!(collect_all(&mut codec, &mut second).is_empty());
        assert!(codec.is_incomplete());

        let mut third = BytesMut::from(&[consts::SE, b'x'][..]);
        assert_eq!(
            collect_all(&mut codec, &mut third),
            vec![
                TelnetFrame::Subnegotiate(TelnetOption::NAWS, Bytes::from_static(&[0, 80, 0, 24])),
                TelnetFrame::Data(b'x'),
            ]
        );
    }

    #[test]
    fn test_subnegotiation_unescapes_iac() {
        let mut codec = TelnetCodec::new();
        let mut src = BytesMut::from(
            &[
                consts::IAC,
                consts::SB,
                consts::option::NAWS,
                0,
                consts::IAC,
                consts::IAC,
                0,
                24,
                consts::IAC,
                consts::SE,
            ][..],
        );
        assert_eq!(
            collect_all(&mut codec, &mut src),
            vec![TelnetFrame::Subnegotiate(
                TelnetOption::NAWS,
                Bytes::from_static(&[0, 255, 0, 24])
            )]
        );
    }

    #[test]
    fn test_invalid_command_is_returned_as_literal() {
        let mut codec = TelnetCodec::new();
        let mut src = BytesMut::from(&[consts::IAC, b'q', b'r'][..]);
        assert_eq!(
            collect_all(&mut codec, &mut src),
            vec![TelnetFrame::Invalid(b'q'), TelnetFrame::Data(b'r')]
        );
        assert!(!codec.is_incomplete());
    }

    #[test]
    fn test_invalid_byte_inside_subnegotiation_aborts() {
        let mut codec = TelnetCodec::new();
        let mut src = BytesMut::from(
            &[consts::IAC, consts::SB, consts::option::TTYPE, 0, b'x', consts::IAC, b'y', b'z'][..],
        );
        assert_eq!(
            collect_all(&mut codec, &mut src),
            vec![TelnetFrame::Invalid(b'y'), TelnetFrame::Data(b'z')]
        );
        assert!(!codec.is_incomplete());
    }

    #[test]
    fn test_oversized_subnegotiation_is_dropped() {
        let mut codec = TelnetCodec::with_subnegotiation_limit(4);
        let mut src = BytesMut::from(
            &[consts::IAC, consts::SB, consts::option::GMCP, 1, 2, 3, 4, 5, 6, consts::IAC, consts::SE][..],
        );
        assert_eq!(collect_all(&mut codec, &mut src), vec![TelnetFrame::NoOperation]);
    }

    #[test]
    fn test_simple_commands() {
        let mut codec = TelnetCodec::new();
        let mut src = BytesMut::from(
            &[
                consts::IAC,
                consts::NOP,
                consts::IAC,
                consts::AYT,
                consts::IAC,
                consts::EC,
                consts::IAC,
                consts::GA,
                consts::IAC,
                consts::WONT,
                consts::option::ECHO,
            ][..],
        );
        assert_eq!(
            collect_all(&mut codec, &mut src),
            vec![
                TelnetFrame::NoOperation,
                TelnetFrame::AreYouThere,
                TelnetFrame::EraseCharacter,
                TelnetFrame::Command(consts::GA),
                TelnetFrame::Wont(TelnetOption::Echo),
            ]
        );
    }

    #[test]
    fn test_encode_negotiation_and_subnegotiation() {
        assert_eq!(
            &encode_frame(TelnetFrame::Do(TelnetOption::NAWS))[..],
            &[consts::IAC, consts::DO, consts::option::NAWS]
        );
        assert_eq!(
            &encode_frame(TelnetFrame::Subnegotiate(
                TelnetOption::GMCP,
                Bytes::from_static(&[b'a', 255, b'b'])
            ))[..],
            &[
                consts::IAC,
                consts::SB,
                consts::option::GMCP,
                b'a',
                255,
                255,
                b'b',
                consts::IAC,
                consts::SE
            ]
        );
    }

    #[test]
    fn test_escape_iac() {
        let mut dst = BytesMut::new();
        escape_iac(&[1, 255, 2, 255], &mut dst);
        assert_eq!(&dst[..], &[1, 255, 255, 2, 255, 255]);
    }
}
