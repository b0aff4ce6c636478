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

//! WebSocket upgrade and framing
//!
//! Browser clients upgrade through the HTTP parser. Every data frame carries a one byte
//! channel tag ahead of its payload; only the text channel is accepted as input, while output
//! can be sent on any channel.

use crate::http::{HttpMethod, HttpRequest};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Length of a valid `Sec-WebSocket-Key`
pub const KEY_LEN: usize = 24;

/// Largest frame accepted from a client
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Sent when an upgrade request lacks a usable key
pub const UPGRADE_REQUIRED: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\nSec-WebSocket-Version: 13\r\n\r\n";

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Channel tags carried as the first payload byte of a data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    /// Plain text
    Text = b't',
    /// JSON
    Json = b'j',
    /// HTML markup
    Html = b'h',
    /// Pueblo markup
    Pueblo = b'p',
    /// Prompt text
    Prompt = b'>',
}

/// True when `request` asks for the WebSocket endpoint
pub fn is_upgrade_request(request: &HttpRequest, url: &str) -> bool {
    request.method() == HttpMethod::Get && request.path() == url
}

/// The handshake reply for a completed upgrade request: `101 Switching Protocols` with the
/// accept key, or `Err` with `426 Upgrade Required` when the key or `Upgrade` header is bad.
pub fn handshake(request: &HttpRequest) -> Result<Bytes, Bytes> {
    let upgrade = request
        .header_value("Upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    let key = request
        .header_value("Sec-WebSocket-Key")
        .filter(|key| key.len() == KEY_LEN);
    match key {
        Some(key) if upgrade => {
            let accept = tungstenite::handshake::derive_accept_key(key.as_bytes());
            Ok(Bytes::from(format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
            )))
        }
        _ => Err(Bytes::from_static(UPGRADE_REQUIRED)),
    }
}

/// Something a client frame asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Bytes of text channel input
    Input(Vec<u8>),
    /// The client closed the connection
    Close,
    /// A ping to answer with this payload
    Ping(Vec<u8>),
}

/// Incremental decoder for client frames. Partial frames are buffered across reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    message_is_text: bool,
}

struct Header {
    fin: bool,
    opcode: u8,
    header_len: usize,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

impl FrameDecoder {
    /// A decoder at a frame boundary
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete frame in `data` plus what was buffered before it.
    /// Oversized frames end the connection.
    pub fn decode(&mut self, data: &[u8]) -> Vec<FrameEvent> {
        self.buffer.extend_from_slice(data);
        let mut events = Vec::new();
        loop {
            let header = match parse_header(&self.buffer) {
                Some(Ok(header)) => header,
                Some(Err(())) => {
                    events.push(FrameEvent::Close);
                    self.buffer.clear();
                    break;
                }
                None => break,
            };
            if self.buffer.len() < header.header_len + header.payload_len {
                break;
            }
            self.buffer.advance(header.header_len);
            let mut payload = self.buffer.split_to(header.payload_len).to_vec();
            if let Some(mask) = header.mask {
                for (index, byte) in payload.iter_mut().enumerate() {
                    *byte ^= mask[index % 4];
                }
            }
            self.dispatch(&header, payload, &mut events);
        }
        events
    }

    fn dispatch(&mut self, header: &Header, payload: Vec<u8>, events: &mut Vec<FrameEvent>) {
        match header.opcode {
            OP_TEXT | OP_BINARY => {
                let mut payload = payload.into_iter();
                self.message_is_text = payload.next() == Some(Channel::Text as u8);
                if self.message_is_text {
                    self.input(payload.collect(), header.fin, events);
                } else {
                    trace!("Ignoring frame on non-text channel");
                }
            }
            OP_CONTINUATION if self.message_is_text => self.input(payload, header.fin, events),
            OP_CONTINUATION | OP_PONG => {}
            OP_CLOSE => events.push(FrameEvent::Close),
            OP_PING => events.push(FrameEvent::Ping(payload)),
            opcode => trace!(opcode, "Ignoring unknown opcode"),
        }
    }

    fn input(&mut self, mut bytes: Vec<u8>, fin: bool, events: &mut Vec<FrameEvent>) {
        if fin {
            // a finished message is a finished line
            bytes.push(b'\n');
            self.message_is_text = false;
        }
        if !bytes.is_empty() {
            events.push(FrameEvent::Input(bytes));
        }
    }
}

/// `None` when more bytes are needed, `Some(Err)` for a frame we refuse
fn parse_header(buffer: &[u8]) -> Option<Result<Header, ()>> {
    if buffer.len() < 2 {
        return None;
    }
    let fin = buffer[0] & 0x80 != 0;
    let opcode = buffer[0] & 0x0F;
    let masked = buffer[1] & 0x80 != 0;
    let (payload_len, mut header_len) = match buffer[1] & 0x7F {
        126 => {
            if buffer.len() < 4 {
                return None;
            }
            (usize::from(u16::from_be_bytes([buffer[2], buffer[3]])), 4)
        }
        127 => {
            if buffer.len() < 10 {
                return None;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buffer[2..10]);
            match usize::try_from(u64::from_be_bytes(raw)) {
                Ok(len) => (len, 10),
                Err(_) => return Some(Err(())),
            }
        }
        len => (usize::from(len), 2),
    };
    if payload_len > MAX_FRAME_LEN {
        return Some(Err(()));
    }
    let mask = if masked {
        if buffer.len() < header_len + 4 {
            return None;
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&buffer[header_len..header_len + 4]);
        header_len += 4;
        Some(key)
    } else {
        None
    };
    Some(Ok(Header {
        fin,
        opcode,
        header_len,
        mask,
        payload_len,
    }))
}

fn put_header(dst: &mut BytesMut, opcode: u8, len: usize) {
    dst.put_u8(0x80 | opcode);
    if len < 126 {
        dst.put_u8(len as u8);
    } else if let Ok(short) = u16::try_from(len) {
        dst.put_u8(126);
        dst.put_u16(short);
    } else {
        dst.put_u8(127);
        dst.put_u64(len as u64);
    }
}

/// Append an unmasked data frame carrying `channel` then `payload`
pub fn encode_frame(channel: Channel, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 11);
    put_header(dst, OP_TEXT, payload.len() + 1);
    dst.put_u8(channel as u8);
    dst.put_slice(payload);
}

/// Append the pong answering a ping
pub fn encode_pong(payload: &[u8], dst: &mut BytesMut) {
    put_header(dst, OP_PONG, payload.len());
    dst.put_slice(payload);
}

/// Append a close frame
pub fn encode_close(dst: &mut BytesMut) {
    put_header(dst, OP_CLOSE, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let mut frame = vec![if fin { 0x80 } else { 0 } | opcode];
        if payload.len() < 126 {
            frame.push(0x80 | payload.len() as u8);
        } else {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        frame
    }

    fn upgrade(headers: &str) -> HttpRequest {
        let mut request = HttpRequest::parse_request_line("GET /wsclient HTTP/1.1").unwrap();
        request.feed(headers.as_bytes()).unwrap();
        request
    }

    #[test]
    fn test_handshake_accept_key() {
        let request = upgrade("Upgrade: websocket\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n");
        assert!(is_upgrade_request(&request, "/wsclient"));
        let reply = handshake(&request).unwrap();
        let text = String::from_utf8(reply.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"));
    }

    #[test]
    fn test_handshake_without_key() {
        let request = upgrade("Upgrade: websocket\r\nSec-WebSocket-Key: short\r\n\r\n");
        assert_eq!(handshake(&request).unwrap_err(), Bytes::from_static(UPGRADE_REQUIRED));
        let request = upgrade("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n");
        assert!(handshake(&request).is_err());
    }

    #[test]
    fn test_text_channel_input() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.decode(&masked(OP_TEXT, true, b"tlook"));
        assert_eq!(events, vec![FrameEvent::Input(b"look\n".to_vec())]);
    }

    #[test]
    fn test_other_channels_ignored() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&masked(OP_TEXT, true, b"j{\"a\":1}")).is_empty());
    }

    #[test]
    fn test_frame_split_across_reads() {
        let frame = masked(OP_TEXT, true, b"tsay hello");
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(&frame[..3]).is_empty());
        assert!(decoder.decode(&frame[3..7]).is_empty());
        assert_eq!(decoder.decode(&frame[7..]), vec![FrameEvent::Input(b"say hello\n".to_vec())]);
    }

    #[test]
    fn test_continuation_and_extended_length() {
        let mut long = vec![b't'];
        long.extend(std::iter::repeat_n(b'a', 200));
        let mut stream = masked(OP_TEXT, false, &long);
        stream.extend(masked(OP_CONTINUATION, true, b"bc"));
        let mut decoder = FrameDecoder::new();
        let events = decoder.decode(&stream);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], FrameEvent::Input(vec![b'a'; 200]));
        assert_eq!(events[1], FrameEvent::Input(b"bc\n".to_vec()));
    }

    #[test]
    fn test_control_frames() {
        let mut decoder = FrameDecoder::new();
        let mut stream = masked(OP_PING, true, b"hi");
        stream.extend(masked(OP_CLOSE, true, b""));
        assert_eq!(decoder.decode(&stream), vec![FrameEvent::Ping(b"hi".to_vec()), FrameEvent::Close]);
    }

    #[test]
    fn test_oversized_frame_closes() {
        let mut decoder = FrameDecoder::new();
        let mut frame = vec![0x81, 0xFF];
        frame.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(decoder.decode(&frame), vec![FrameEvent::Close]);
    }

    #[test]
    fn test_encode_frame_lengths() {
        let mut out = BytesMut::new();
        encode_frame(Channel::Text, b"hi", &mut out);
        assert_eq!(&out[..], &[0x81, 3, b't', b'h', b'i']);

        let mut out = BytesMut::new();
        encode_frame(Channel::Text, &[b'x'; 300], &mut out);
        assert_eq!(&out[..4], &[0x81, 126, 0x01, 0x2D]);
        assert_eq!(out.len(), 4 + 301);

        let mut out = BytesMut::new();
        encode_frame(Channel::Prompt, &vec![b'x'; 70000], &mut out);
        assert_eq!(out[1], 127);
        assert_eq!(out.len(), 10 + 70001);
    }
}
