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

//! One read/write surface over TCP, local sockets and in-process TLS

use crate::tls::{TlsState, TlsStream};
use std::io::{self, IoSlice, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;

/// The socket behind a session
#[derive(Debug)]
pub enum Transport {
    /// Plaintext TCP
    Tcp(TcpStream),
    /// Local socket, either the offload subprocess or a local client
    Unix(UnixStream),
    /// TLS over TCP
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Read decrypted bytes. `Ok(0)` is end of stream and `WouldBlock` means no data yet.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.read(buf),
            Transport::Unix(stream) => stream.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }

    /// Write queued chunks with a single gathering call
    pub fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self {
            Transport::Tcp(stream) => stream.write_vectored(bufs),
            Transport::Unix(stream) => stream.write_vectored(bufs),
            Transport::Tls(stream) => stream.write_vectored(bufs),
        }
    }

    /// True when the transport has bytes of its own to send
    pub fn wants_write(&self) -> bool {
        match self {
            Transport::Tls(stream) => stream.wants_write(),
            _ => false,
        }
    }

    /// True when a stalled write waits for readability
    pub fn wants_read_for_write(&self) -> bool {
        match self {
            Transport::Tls(stream) => stream.wants_read_for_write(),
            _ => false,
        }
    }

    /// Push pending TLS records
    pub fn flush_records(&mut self) -> io::Result<()> {
        match self {
            Transport::Tls(stream) => stream.flush_records(),
            _ => Ok(()),
        }
    }

    /// TLS state bits, `None` for plaintext
    pub fn tls_state(&self) -> Option<TlsState> {
        match self {
            Transport::Tls(stream) => Some(stream.state()),
            _ => None,
        }
    }

    /// True once application data can flow
    pub fn is_established(&self) -> bool {
        self.tls_state().is_none_or(TlsState::is_established)
    }

    /// Close both directions, after a TLS close_notify where relevant
    pub fn shutdown(&mut self) {
        let _ = match self {
            Transport::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Transport::Unix(stream) => stream.shutdown(Shutdown::Both),
            Transport::Tls(stream) => {
                stream.close();
                stream.get_ref().shutdown(Shutdown::Both)
            }
        };
    }

    /// The OS descriptor number
    pub fn raw_fd(&self) -> RawFd {
        self.as_fd().as_raw_fd()
    }
}

impl AsFd for Transport {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Transport::Tcp(stream) => stream.as_fd(),
            Transport::Unix(stream) => stream.as_fd(),
            Transport::Tls(stream) => stream.get_ref().as_fd(),
        }
    }
}
