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

//! Integration tests for telnetcodec
//!
//! These tests drive the codec and the option table together the way a session does.

use bytes::{Bytes, BytesMut};
use netmush_telnetcodec::{
    NegotiatedOptions, OptionTable, Request, TelnetCodec, TelnetEvent, TelnetFrame, TelnetOption,
    charset::CharsetChoice, consts, escape_iac, naws::WindowSize,
};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

// ============================================================================
// Helper Functions
// ============================================================================

fn decode_all(codec: &mut TelnetCodec, buffer: &mut BytesMut) -> Vec<TelnetFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buffer).unwrap() {
        frames.push(frame);
    }
    frames
}

fn data_of(frames: &[TelnetFrame]) -> Vec<u8> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            TelnetFrame::Data(byte) => Some(*byte),
            _ => None,
        })
        .collect()
}

/// Applies every frame to the table the way the session reader does and returns the
/// events and reply bytes.
fn dispatch(
    table: &OptionTable,
    seen: &mut NegotiatedOptions,
    frames: Vec<TelnetFrame>,
) -> (Vec<TelnetEvent>, BytesMut) {
    let mut events = Vec::new();
    let mut reply = BytesMut::new();
    for frame in frames {
        let event = match frame {
            TelnetFrame::Do(option) if seen.mark(option) => {
                table.negotiate(Request::Do, option, &mut reply).event().cloned()
            }
            TelnetFrame::Will(option) if seen.mark(option) => {
                table.negotiate(Request::Will, option, &mut reply).event().cloned()
            }
            TelnetFrame::Subnegotiate(option, payload) => {
                table.subnegotiate(option, payload, &mut reply).unwrap()
            }
            _ => None,
        };
        events.extend(event);
    }
    (events, reply)
}

// ============================================================================
// Negotiation Flows
// ============================================================================

#[test]
fn client_accepts_terminal_type_and_reports_it() {
    let table = OptionTable::standard();
    let mut seen = NegotiatedOptions::default();
    let mut codec = TelnetCodec::new();

    let mut input = BytesMut::from(&[consts::IAC, consts::WILL, consts::option::TTYPE][..]);
    let (events, reply) = dispatch(&table, &mut seen, decode_all(&mut codec, &mut input));
    assert!(events.is_empty());
    assert_eq!(&reply[..], &[255, 250, 24, 1, 255, 240]);

    let mut input = BytesMut::new();
    input.extend_from_slice(&[consts::IAC, consts::SB, consts::option::TTYPE, 0]);
    input.extend_from_slice(b"MUDLET");
    input.extend_from_slice(&[consts::IAC, consts::SE]);
    let (events, reply) = dispatch(&table, &mut seen, decode_all(&mut codec, &mut input));
    assert_eq!(events, vec![TelnetEvent::TerminalType("MUDLET".to_string())]);
    assert!(reply.is_empty());
}

#[test]
fn repeated_will_runs_handler_once() {
    let table = OptionTable::standard();
    let mut seen = NegotiatedOptions::default();
    let mut codec = TelnetCodec::new();

    let mut input = BytesMut::from(
        &[
            consts::IAC,
            consts::WILL,
            consts::option::TTYPE,
            consts::IAC,
            consts::WILL,
            consts::option::TTYPE,
        ][..],
    );
    let (_, reply) = dispatch(&table, &mut seen, decode_all(&mut codec, &mut input));
    assert_eq!(&reply[..], &[255, 250, 24, 1, 255, 240]);
}

#[test]
fn window_size_split_across_reads() {
    let table = OptionTable::standard();
    let mut seen = NegotiatedOptions::default();
    let mut codec = TelnetCodec::new();

    let mut first = BytesMut::from(&[consts::IAC, consts::SB, consts::option::NAWS, 0, 80][..]);
    assert!(decode_all(&mut codec, &mut first).is_empty());
    assert!(codec.is_incomplete());

    let mut second = BytesMut::from(&[0, 24, consts::IAC, consts::SE][..]);
    let (events, _) = dispatch(&table, &mut seen, decode_all(&mut codec, &mut second));
    assert_eq!(events, vec![TelnetEvent::WindowSize(WindowSize::new(80, 24))]);
    assert!(!codec.is_incomplete());
}

#[test]
fn charset_negotiation_selects_utf8() {
    let table = OptionTable::standard();
    let mut seen = NegotiatedOptions::default();
    let mut codec = TelnetCodec::new();

    let mut input = BytesMut::new();
    input.extend_from_slice(&[consts::IAC, consts::DO, consts::option::CHARSET]);
    input.extend_from_slice(&[consts::IAC, consts::SB, consts::option::CHARSET, 2]);
    input.extend_from_slice(b"UTF-8");
    input.extend_from_slice(&[consts::IAC, consts::SE]);
    let (events, reply) = dispatch(&table, &mut seen, decode_all(&mut codec, &mut input));
    assert_eq!(events, vec![TelnetEvent::Charset(CharsetChoice::Utf8)]);
    assert!(reply.starts_with(&[255, 250, 42, 1]));
    assert!(reply.ends_with(&[255, 240]));
}

#[test]
fn gmcp_enable_and_message() {
    let table = OptionTable::standard();
    let mut seen = NegotiatedOptions::default();
    let mut codec = TelnetCodec::new();

    let mut input = BytesMut::new();
    input.extend_from_slice(&[consts::IAC, consts::DO, consts::option::GMCP]);
    input.extend_from_slice(&[consts::IAC, consts::SB, consts::option::GMCP]);
    input.extend_from_slice(b"Core.Ping");
    input.extend_from_slice(&[consts::IAC, consts::SE]);
    let (events, _) = dispatch(&table, &mut seen, decode_all(&mut codec, &mut input));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], TelnetEvent::GmcpEnabled);
    assert!(matches!(&events[1], TelnetEvent::Gmcp(message) if message.package() == "Core.Ping"));
}

#[test]
fn invalid_command_degrades_to_data() {
    let mut codec = TelnetCodec::new();
    let mut input = BytesMut::from(&[b'a', consts::IAC, b'b', b'c'][..]);
    let frames = decode_all(&mut codec, &mut input);
    assert_eq!(
        frames,
        vec![
            TelnetFrame::Data(b'a'),
            TelnetFrame::Invalid(b'b'),
            TelnetFrame::Data(b'c'),
        ]
    );
}

#[test]
fn refuse_unsupported_in_both_directions() {
    let table = OptionTable::standard();
    let mut reply = BytesMut::new();
    table.negotiate(Request::Do, TelnetOption::Echo, &mut reply);
    table.negotiate(Request::Will, TelnetOption::TransmitBinary, &mut reply);
    assert_eq!(
        &reply[..],
        &[
            consts::IAC,
            consts::WONT,
            consts::option::ECHO,
            consts::IAC,
            consts::DONT,
            consts::option::BINARY,
        ]
    );
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn escaped_data_decodes_to_original(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut escaped = BytesMut::new();
        escape_iac(&data, &mut escaped);
        let mut codec = TelnetCodec::new();
        let frames = decode_all(&mut codec, &mut escaped);
        prop_assert_eq!(data_of(&frames), data);
        prop_assert!(!codec.is_incomplete());
    }

    #[test]
    fn split_point_does_not_change_frames(
        data in proptest::collection::vec(any::<u8>(), 1..256),
        split in any::<prop::sample::Index>(),
    ) {
        let mut escaped = BytesMut::new();
        escape_iac(&data, &mut escaped);
        let at = split.index(escaped.len());

        let mut whole = escaped.clone();
        let mut codec = TelnetCodec::new();
        let expected = decode_all(&mut codec, &mut whole);

        let mut first = escaped.split_to(at);
        let mut codec = TelnetCodec::new();
        let mut frames = decode_all(&mut codec, &mut first);
        frames.extend(decode_all(&mut codec, &mut escaped));
        prop_assert_eq!(frames, expected);
    }

    #[test]
    fn subnegotiation_payload_survives_escaping(payload in proptest::collection::vec(any::<u8>(), 0..128)) {
        let mut input = BytesMut::from(&[consts::IAC, consts::SB, consts::option::GMCP][..]);
        escape_iac(&payload, &mut input);
        input.extend_from_slice(&[consts::IAC, consts::SE]);
        let mut codec = TelnetCodec::new();
        let frames = decode_all(&mut codec, &mut input);
        prop_assert_eq!(
            frames,
            vec![TelnetFrame::Subnegotiate(TelnetOption::GMCP, Bytes::from(payload))]
        );
    }
}
