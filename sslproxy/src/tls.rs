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
//! Certificate loading and the TLS acceptor

use crate::args::ProxyArgs;
use crate::error::{ProxyError, ProxyResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Read every certificate in a PEM file
pub fn load_certs(path: &Path) -> ProxyResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ProxyError::Config(format!("Failed to open certificate file {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Config(format!("Failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(ProxyError::Config(format!("No certificate in {}", path.display())));
    }
    Ok(certs)
}

/// Read the first private key in a PEM file
pub fn load_private_key(path: &Path) -> ProxyResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| ProxyError::Config(format!("Failed to open key file {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ProxyError::Config(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| ProxyError::Config(format!("No private key in {}", path.display())))
}

/// Build the acceptor for the arguments' certificate, key and optional client CA
pub fn acceptor(args: &ProxyArgs) -> ProxyResult<TlsAcceptor> {
    let certs = load_certs(&args.cert_file())?;
    let key = load_private_key(&args.key_file)?;
    let builder = match args.ca_file() {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(&ca_file)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots));
            let verifier = if args.require_client_cert() {
                verifier.build()
            } else {
                verifier.allow_unauthenticated().build()
            }
            .map_err(|e| ProxyError::Config(format!("Failed to build client verifier: {e}")))?;
            ServerConfig::builder().with_client_cert_verifier(verifier)
        }
        None if args.require_client_cert() => {
            return Err(ProxyError::Config("Client certificates required but no CA file given".into()));
        }
        None => ServerConfig::builder().with_no_client_auth(),
    };
    let config = builder.with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    fn args(ca: &str, require: &str) -> ProxyArgs {
        let argv: Vec<OsString> = vec![
            "netmush-sslproxy".into(),
            "/tmp/netmush.sock".into(),
            "127.0.0.1".into(),
            "0".into(),
            fixture("key.pem").into_os_string(),
            ca.into(),
            require.into(),
            "0".into(),
            fixture("cert.pem").into_os_string(),
        ];
        ProxyArgs::parse_from(argv)
    }

    #[test]
    fn test_fixture_material_loads() {
        assert_eq!(load_certs(&fixture("cert.pem")).unwrap().len(), 1);
        assert!(load_private_key(&fixture("key.pem")).is_ok());
        assert!(acceptor(&args("-", "0")).is_ok());
    }

    #[test]
    fn test_key_file_has_no_certificate() {
        assert!(matches!(load_certs(&fixture("key.pem")), Err(ProxyError::Config(_))));
    }

    #[test]
    fn test_require_without_ca_is_rejected() {
        assert!(matches!(acceptor(&args("-", "1")), Err(ProxyError::Config(_))));
    }
}
