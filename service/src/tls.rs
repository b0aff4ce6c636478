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

//! Non-blocking TLS over a poll loop
//!
//! rustls never touches the socket itself; [`TlsStream`] moves records between the socket and
//! the connection and records, as explicit state bits, why an operation could not finish.

use crate::error::{NetError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{Accepted, Acceptor, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig, ServerConnection};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, IoSlice, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Plaintext rustls buffers before `write` reports back-pressure
pub const TLS_BUFFER_LIMIT: usize = 64 * 1024;

/// Load a PEM certificate chain
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| NetError::Config(format!("Failed to open certificate file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NetError::Config(format!("Failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(NetError::Config(format!("No certificates in {}", path.display())));
    }
    Ok(certs)
}

/// Load the first PEM private key in `path`
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| NetError::Config(format!("Failed to open key file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let items = rustls_pemfile::read_all(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NetError::Config(format!("Failed to parse private key: {e}")))?;

    for item in items {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(NetError::Config("No valid private key found in file".into()))
}

/// Build the server side configuration. With a CA file, client certificates signed by it
/// are verified, and required when `require_client_cert` is set.
pub fn server_config(
    cert_file: &Path,
    key_file: &Path,
    ca_file: Option<&Path>,
    require_client_cert: bool,
) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let builder = match ca_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = if require_client_cert {
                verifier.build()
            } else {
                verifier.allow_unauthenticated().build()
            }
            .map_err(|e| NetError::Config(format!("Failed to build client verifier: {e}")))?;
            ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None => ServerConfig::builder().with_no_client_auth(),
    };

    Ok(Arc::new(builder.with_single_cert(certs, key)?))
}

/// TLS progress bits of one session
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsState(u8);

impl TlsState {
    /// The ClientHello has not been accepted yet
    pub const NEED_ACCEPT: TlsState = TlsState(1);
    /// The handshake is still running
    pub const NEED_HANDSHAKE: TlsState = TlsState(1 << 1);
    /// A write stalled until the socket becomes readable
    pub const READ_ON_WRITE: TlsState = TlsState(1 << 2);
    /// A read stalled until the socket becomes writable
    pub const WRITE_ON_READ: TlsState = TlsState(1 << 3);

    /// True when every bit of `other` is set
    pub fn contains(self, other: TlsState) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: TlsState) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: TlsState) {
        self.0 &= !other.0;
    }

    /// True when application data may flow
    pub fn is_established(self) -> bool {
        self.0 & (Self::NEED_ACCEPT.0 | Self::NEED_HANDSHAKE.0) == 0
    }
}

impl fmt::Debug for TlsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (bit, name) in [
            (Self::NEED_ACCEPT, "NEED_ACCEPT"),
            (Self::NEED_HANDSHAKE, "NEED_HANDSHAKE"),
            (Self::READ_ON_WRITE, "READ_ON_WRITE"),
            (Self::WRITE_ON_READ, "WRITE_ON_READ"),
        ] {
            if self.contains(bit) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// How far a non-blocking step got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProgress {
    /// The handshake is complete
    Ready,
    /// The socket must become readable first
    BlockedOnRead,
    /// The socket must become writable first
    BlockedOnWrite,
}

fn fatal(err: rustls::Error) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, err)
}

/// Feed the acceptor whatever the socket has. `Ok(None)` means more bytes are needed;
/// errors are fatal and the alert has already been sent.
pub fn accept_step<S: Read + Write>(acceptor: &mut Acceptor, sock: &mut S) -> io::Result<Option<Accepted>> {
    loop {
        match acceptor.read_tls(sock) {
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(err),
        }
        match acceptor.accept() {
            Ok(Some(accepted)) => return Ok(Some(accepted)),
            Ok(None) => continue,
            Err((err, mut alert)) => {
                let _ = alert.write_all(sock);
                return Err(fatal(err));
            }
        }
    }
}

/// A server-side TLS session over a non-blocking socket
pub struct TlsStream<S> {
    sock: S,
    state: TlsState,
    acceptor: Acceptor,
    conn: Option<ServerConnection>,
    config: Arc<ServerConfig>,
}

impl<S: Read + Write> TlsStream<S> {
    /// Wrap a freshly accepted socket
    pub fn new(sock: S, config: Arc<ServerConfig>) -> Self {
        let mut state = TlsState::default();
        state.insert(TlsState::NEED_ACCEPT);
        state.insert(TlsState::NEED_HANDSHAKE);
        Self {
            sock,
            state,
            acceptor: Acceptor::default(),
            conn: None,
            config,
        }
    }

    /// The current state bits
    pub fn state(&self) -> TlsState {
        self.state
    }

    /// The underlying socket
    pub fn get_ref(&self) -> &S {
        &self.sock
    }

    /// True when the client presented a certificate
    pub fn has_peer_certificate(&self) -> bool {
        self.conn
            .as_ref()
            .and_then(|conn| conn.peer_certificates())
            .is_some_and(|certs| !certs.is_empty())
    }

    /// Advance accept and handshake without blocking
    pub fn advance(&mut self) -> io::Result<TlsProgress> {
        if self.state.contains(TlsState::NEED_ACCEPT) {
            let Some(accepted) = accept_step(&mut self.acceptor, &mut self.sock)? else {
                return Ok(TlsProgress::BlockedOnRead);
            };
            match accepted.into_connection(Arc::clone(&self.config)) {
                Ok(mut conn) => {
                    conn.set_buffer_limit(Some(TLS_BUFFER_LIMIT));
                    self.conn = Some(conn);
                    self.state.remove(TlsState::NEED_ACCEPT);
                    trace!("TLS ClientHello accepted");
                }
                Err((err, mut alert)) => {
                    let _ = alert.write_all(&mut self.sock);
                    return Err(fatal(err));
                }
            }
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ErrorKind::NotConnected.into());
        };
        if self.state.contains(TlsState::NEED_HANDSHAKE) {
            while conn.is_handshaking() {
                if conn.wants_write() {
                    match conn.write_tls(&mut self.sock) {
                        Ok(_) => continue,
                        Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(TlsProgress::BlockedOnWrite),
                        Err(err) => return Err(err),
                    }
                }
                match conn.read_tls(&mut self.sock) {
                    Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                    Ok(_) => {
                        if let Err(err) = conn.process_new_packets() {
                            let _ = conn.write_tls(&mut self.sock);
                            return Err(fatal(err));
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(TlsProgress::BlockedOnRead),
                    Err(err) => return Err(err),
                }
            }
            self.state.remove(TlsState::NEED_HANDSHAKE);
            debug!(
                client_cert = self.has_peer_certificate(),
                "TLS handshake complete"
            );
        }
        Ok(TlsProgress::Ready)
    }

    /// Push pending records to the socket; stops quietly when it would block
    pub fn flush_records(&mut self) -> io::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        while conn.wants_write() {
            match conn.write_tls(&mut self.sock) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Read plaintext. `WouldBlock` means try again after the readiness the state bits ask
    /// for; `Ok(0)` is a closed connection.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.state.remove(TlsState::WRITE_ON_READ);
        match self.advance()? {
            TlsProgress::Ready => {}
            TlsProgress::BlockedOnRead => return Err(ErrorKind::WouldBlock.into()),
            TlsProgress::BlockedOnWrite => {
                self.state.insert(TlsState::WRITE_ON_READ);
                return Err(ErrorKind::WouldBlock.into());
            }
        }
        loop {
            let Some(conn) = self.conn.as_mut() else {
                return Err(ErrorKind::NotConnected.into());
            };
            match conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) => return Err(err),
            }
            match conn.read_tls(&mut self.sock) {
                Ok(0) => return Ok(0),
                Ok(_) => {
                    conn.process_new_packets().map_err(fatal)?;
                }
                Err(err) => return Err(err),
            }
            if conn.wants_write() {
                self.flush_records()?;
                if self.conn.as_ref().is_some_and(|conn| conn.wants_write()) {
                    self.state.insert(TlsState::WRITE_ON_READ);
                }
            }
        }
    }

    /// Hand plaintext to the session and push as many records as the socket takes
    pub fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.state.remove(TlsState::READ_ON_WRITE);
        match self.advance()? {
            TlsProgress::Ready => {}
            TlsProgress::BlockedOnRead => {
                self.state.insert(TlsState::READ_ON_WRITE);
                return Err(ErrorKind::WouldBlock.into());
            }
            TlsProgress::BlockedOnWrite => return Err(ErrorKind::WouldBlock.into()),
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(ErrorKind::NotConnected.into());
        };
        let accepted = conn.writer().write_vectored(bufs)?;
        self.flush_records()?;
        if accepted == 0 && bufs.iter().any(|buf| !buf.is_empty()) {
            return Err(ErrorKind::WouldBlock.into());
        }
        Ok(accepted)
    }

    /// True when records are waiting for the socket to become writable
    pub fn wants_write(&self) -> bool {
        self.state.contains(TlsState::WRITE_ON_READ)
            || self.conn.as_ref().is_some_and(|conn| conn.wants_write())
    }

    /// True when a write is waiting for the socket to become readable
    pub fn wants_read_for_write(&self) -> bool {
        self.state.contains(TlsState::READ_ON_WRITE)
    }

    /// Send close_notify, best effort
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            conn.send_close_notify();
        }
        let _ = self.flush_records();
    }
}

impl<S> fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream").field("state", &self.state).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_state_bits() {
        let mut state = TlsState::default();
        assert!(state.is_established());
        state.insert(TlsState::NEED_ACCEPT);
        state.insert(TlsState::WRITE_ON_READ);
        assert!(!state.is_established());
        assert_eq!(format!("{state:?}"), "{\"NEED_ACCEPT\", \"WRITE_ON_READ\"}");
        state.remove(TlsState::NEED_ACCEPT);
        assert!(state.is_established());
        assert!(state.contains(TlsState::WRITE_ON_READ));
    }

    #[test]
    fn test_accept_needs_more_bytes() {
        let (mut server, mut client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let mut acceptor = Acceptor::default();
        assert!(accept_step(&mut acceptor, &mut server).unwrap().is_none());

        // handshake record header announcing more bytes than were sent
        client.write_all(&[0x16, 0x03, 0x01, 0x00, 0x40, 0x01]).unwrap();
        assert!(accept_step(&mut acceptor, &mut server).unwrap().is_none());
    }

    #[test]
    fn test_accept_rejects_plaintext() {
        let (mut server, mut client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut acceptor = Acceptor::default();
        let err = accept_step(&mut acceptor, &mut server).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_accept_eof() {
        let (mut server, client) = UnixStream::pair().unwrap();
        drop(client);
        let mut acceptor = Acceptor::default();
        let err = accept_step(&mut acceptor, &mut server).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[derive(Debug)]
    struct NoCert;

    impl rustls::server::ResolvesServerCert for NoCert {
        fn resolve(&self, _hello: rustls::server::ClientHello<'_>) -> Option<Arc<rustls::sign::CertifiedKey>> {
            None
        }
    }

    #[test]
    fn test_stream_before_accept() {
        let config = ServerConfig::builder().with_no_client_auth().with_cert_resolver(Arc::new(NoCert));
        let (server, _client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let stream = TlsStream::new(server, Arc::new(config));
        assert!(!stream.state().is_established());
        assert!(!stream.has_peer_certificate());
        assert!(!stream.wants_write());
        assert!(!stream.wants_read_for_write());
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pem");
        assert!(matches!(load_certs(&missing), Err(NetError::Config(_))));

        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "not pem\n").unwrap();
        assert!(matches!(load_certs(&empty), Err(NetError::Config(_))));
        assert!(matches!(load_private_key(&empty), Err(NetError::Config(_))));
    }
}
