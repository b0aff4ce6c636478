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
//! Integration tests driving a live server over real sockets

use netmush_service::{
    CommandResult, Context, DisconnectNotice, GreetingMode, Interpreter, Server, ServiceConfig, ShutdownReason,
    TransportKind,
};
use netmush_telnetcodec::OptionTable;
use netmush_telnetcodec::consts::{IAC, SB, SE, WILL, option};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct Recorder {
    commands: Vec<String>,
    disconnects: Vec<ShutdownReason>,
}

impl Interpreter for Recorder {
    fn welcome(&mut self, cx: &mut Context<'_>) {
        cx.session.send_line("Welcome to the test world");
    }

    fn execute(&mut self, cx: &mut Context<'_>, command: &str) -> CommandResult {
        self.commands.push(command.to_string());
        cx.session.send_line(&format!("echo: {command}"));
        CommandResult::Ok
    }

    fn disconnected(&mut self, notice: &DisconnectNotice) {
        self.disconnects.push(notice.reason);
    }

    fn serves_http(&self) -> bool {
        true
    }

    fn http_request(&mut self, cx: &mut Context<'_>) -> bool {
        let found = cx.session.http_request().is_some_and(|request| request.route() == "HTTP`STATUS");
        if found && let Some(response) = cx.session.http_response_mut() {
            response.write(b"up");
        }
        found
    }
}

fn config(dir: &TempDir) -> ServiceConfig {
    ServiceConfig::new()
        .with_bind_address("127.0.0.1:0".parse().unwrap())
        .with_reboot_file(dir.path().join("reboot.db"))
        .with_poll_ceiling(Duration::from_millis(10))
}

fn pump(server: &mut Server<Recorder>, ticks: usize) {
    for _ in 0..ticks {
        server.tick().unwrap();
    }
}

fn read_some(stream: &mut impl Read) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 2048];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn connect(server: &Server<Recorder>) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    stream
}

#[test]
fn test_offers_sent_once_and_ttype_requested_once() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir), Recorder::default()).unwrap();
    let mut client = connect(&server);
    pump(&mut server, 5);

    let greeting = read_some(&mut client);
    let offers = OptionTable::standard().offers().clone();
    assert!(greeting.starts_with(&offers));
    assert!(String::from_utf8_lossy(&greeting).contains("Welcome to the test world"));

    client.write_all(&[IAC, WILL, option::TTYPE]).unwrap();
    pump(&mut server, 5);
    assert_eq!(read_some(&mut client), [IAC, SB, option::TTYPE, option::ttype::SEND, IAC, SE]);

    client.write_all(&[IAC, WILL, option::TTYPE]).unwrap();
    pump(&mut server, 5);
    assert!(read_some(&mut client).is_empty());

    let mut reply = vec![IAC, SB, option::TTYPE, option::ttype::IS];
    reply.extend_from_slice(b"xterm-256color");
    reply.extend_from_slice(&[IAC, SE]);
    client.write_all(&reply).unwrap();
    pump(&mut server, 5);
    let session = server.sessions().iter().next().unwrap();
    assert_eq!(session.terminal_type(), "xterm-256color");
}

#[test]
fn test_lines_round_trip_through_interpreter() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir), Recorder::default()).unwrap();
    let mut client = connect(&server);
    pump(&mut server, 5);
    read_some(&mut client);

    client.write_all(b"say hi\r\nIDLE\r\n").unwrap();
    pump(&mut server, 5);
    assert_eq!(server.interpreter().commands, ["say hi"]);
    assert!(String::from_utf8_lossy(&read_some(&mut client)).contains("echo: say hi"));

    let session = server.sessions().iter().next().unwrap();
    assert_eq!(session.cmds(), 1);
    assert_eq!(session.kind(), TransportKind::PlainIp);
}

#[test]
fn test_http_route_is_served_and_closed() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir).with_greeting(GreetingMode::Probe), Recorder::default()).unwrap();
    let mut client = connect(&server);
    client.write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    pump(&mut server, 10);

    let response = String::from_utf8(read_some(&mut client)).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Connection: Close"));
    assert!(response.ends_with("up"));
    assert!(server.sessions().is_empty());
    assert_eq!(server.interpreter().disconnects, [ShutdownReason::HttpDisconnect]);
    assert_eq!(server.metrics().snapshot().http_requests, 1);
}

#[test]
fn test_http_unknown_route_is_not_found() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir).with_greeting(GreetingMode::Probe), Recorder::default()).unwrap();
    let mut client = connect(&server);
    client.write_all(b"GET /missing HTTP/1.1\r\n\r\n").unwrap();
    pump(&mut server, 10);

    let response = String::from_utf8(read_some(&mut client)).unwrap();
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    assert!(response.contains("File not found. \"HTTP`MISSING\""));
}

#[test]
fn test_http_oversized_body_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir).with_greeting(GreetingMode::Probe), Recorder::default()).unwrap();
    let mut client = connect(&server);
    client.write_all(b"POST /status HTTP/1.1\r\nContent-Length: 1000000\r\n\r\n").unwrap();
    pump(&mut server, 10);

    let response = String::from_utf8(read_some(&mut client)).unwrap();
    assert!(response.starts_with("HTTP/1.1 413"), "{response}");
    assert!(server.sessions().is_empty());
    assert!(server.interpreter().commands.is_empty());
}

#[test]
fn test_websocket_upgrade_and_text_frame() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir).with_greeting(GreetingMode::Probe), Recorder::default()).unwrap();
    let mut client = connect(&server);
    client
        .write_all(
            b"GET /wsclient HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();
    pump(&mut server, 5);

    let reply = read_some(&mut client);
    let text = String::from_utf8_lossy(&reply);
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{text}");
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    let body = &reply[text.find("\r\n\r\n").unwrap() + 4..];
    assert_eq!(body[0], 0x81);
    assert_eq!(body[2], b't');

    let payload = b"tlook";
    let mask = [0x11, 0x22, 0x33, 0x44];
    let mut frame = vec![0x81, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    client.write_all(&frame).unwrap();
    pump(&mut server, 5);
    assert_eq!(server.interpreter().commands, ["look"]);
}

#[test]
fn test_local_preamble_sets_address() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("netmush.sock");
    let mut server = Server::bind(config(&dir).with_local_socket(&socket), Recorder::default()).unwrap();
    server.trust_proxy_pid(std::process::id() as i32);

    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    client.write_all(b"203.0.113.7^client.example.com\r\nconnect guest\r\n").unwrap();
    pump(&mut server, 5);

    let session = server.sessions().iter().next().unwrap();
    assert_eq!(session.ip(), "203.0.113.7");
    assert_eq!(session.host(), "client.example.com");
    assert_eq!(session.kind(), TransportKind::TlsProxy);
    assert_eq!(server.interpreter().commands, ["connect guest"]);
    assert!(!read_some(&mut client).is_empty());
}

#[test]
fn test_local_connection_without_preamble_is_closed() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("netmush.sock");
    let mut server = Server::bind(config(&dir).with_local_socket(&socket), Recorder::default()).unwrap();
    server.trust_proxy_pid(std::process::id() as i32);

    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    client.write_all(b"no separator here\r\n").unwrap();
    pump(&mut server, 3);

    assert!(server.sessions().is_empty());
    assert_eq!(server.metrics().snapshot().proxy_rejections, 1);
    assert!(read_some(&mut client).is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_same_user_local_client_cannot_pose_as_proxy() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("netmush.sock");
    let mut server = Server::bind(config(&dir).with_local_socket(&socket), Recorder::default()).unwrap();
    server.trust_proxy_pid(i32::MAX);

    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    client.write_all(b"203.0.113.7^forged.example.com\r\n").unwrap();
    pump(&mut server, 3);

    assert!(server.sessions().is_empty());
    assert_eq!(server.metrics().snapshot().proxy_rejections, 1);
    assert!(read_some(&mut client).is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_foreign_local_client_skips_preamble() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("netmush.sock");
    let config = config(&dir).with_local_socket(&socket).with_foreign_local(true);
    let mut server = Server::bind(config, Recorder::default()).unwrap();

    let mut client = UnixStream::connect(&socket).unwrap();
    client.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    client.write_all(b"203.0.113.7^forged.example.com\r\n").unwrap();
    pump(&mut server, 5);

    let session = server.sessions().iter().next().unwrap();
    assert_eq!(session.kind(), TransportKind::LocalSocket);
    assert_eq!(session.ip(), "127.0.0.1");
    assert_eq!(server.interpreter().commands, ["203.0.113.7^forged.example.com"]);
}

#[test]
fn test_shutdown_says_goodbye() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir), Recorder::default()).unwrap();
    let mut client = connect(&server);
    pump(&mut server, 5);
    read_some(&mut client);

    server.shutdown();
    assert!(server.sessions().is_empty());
    assert!(String::from_utf8_lossy(&read_some(&mut client)).contains("Going down - Bye"));
    assert_eq!(server.interpreter().disconnects, [ShutdownReason::Shutdown]);
}

#[test]
fn test_reboot_record_resumes_live_sessions() {
    let dir = TempDir::new().unwrap();
    let mut server = Server::bind(config(&dir), Recorder::default()).unwrap();
    let addr = server.local_addr().unwrap();
    let mut client = connect(&server);
    pump(&mut server, 5);
    read_some(&mut client);
    client.write_all(b"before\r\n").unwrap();
    pump(&mut server, 5);
    assert!(String::from_utf8_lossy(&read_some(&mut client)).contains("echo: before"));

    let record = server.save_for_reboot().unwrap();
    assert_eq!(record.sessions.len(), 1);
    assert!(dir.path().join("reboot.db").exists());
    // the next image owns every descriptor in the record
    std::mem::forget(server);

    let mut resumed = Server::bind(config(&dir), Recorder::default()).unwrap();
    assert!(!dir.path().join("reboot.db").exists());
    assert_eq!(resumed.local_addr(), Some(addr));
    assert_eq!(resumed.status().reboot_count, 1);
    assert_eq!(resumed.sessions().len(), 1);
    let session = resumed.sessions().iter().next().unwrap();
    assert_eq!(session.fd(), record.sessions[0].fd);
    assert_eq!(session.kind(), TransportKind::PlainIp);
    assert_eq!(session.ip(), "127.0.0.1");

    client.write_all(b"after\r\n").unwrap();
    pump(&mut resumed, 5);
    assert_eq!(resumed.interpreter().commands, ["after"]);
    assert!(String::from_utf8_lossy(&read_some(&mut client)).contains("echo: after"));

    let mut second = connect(&resumed);
    pump(&mut resumed, 5);
    assert!(String::from_utf8_lossy(&read_some(&mut second)).contains("Welcome to the test world"));
    assert_eq!(resumed.sessions().len(), 2);
}
