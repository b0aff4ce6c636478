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
//! Configuration loading tests

use netmush_service::{GreetingMode, QuotaConfig, ServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_toml_overrides_defaults() {
    let config: ServiceConfig = toml::from_str(
        r#"
        bind_address = "127.0.0.1:4201"
        max_sessions = 64
        local_socket = "/run/netmush.sock"
        greeting = "probe"
        http_timeout_ms = 500
        mud_name = "Test World"
        mud_url = "https://mush.example.com/"

        [command_quota]
        slice_ms = 500
        per_slice = 2
        burst = 20

        [tls]
        address = "0.0.0.0:4202"
        cert_file = "cert.pem"
        key_file = "key.pem"

        [offload]
        enabled = true
        keepalive_secs = 60

        [mssp]
        GENRE = "Social"
        "#,
    )
    .unwrap();

    assert_eq!(config.max_sessions, 64);
    assert_eq!(config.greeting, GreetingMode::Probe);
    assert_eq!(config.http_timeout(), Duration::from_millis(500));
    assert_eq!(config.command_quota, QuotaConfig::new(500, 2, 20));
    assert_eq!(config.tls.key_file, Some(PathBuf::from("key.pem")));
    assert_eq!(config.tls.handshake_timeout(), Duration::from_secs(10));
    assert!(config.offload.enabled);
    assert_eq!(config.offload.keepalive_secs, 60);
    assert_eq!(config.mssp.get("GENRE").map(String::as_str), Some("Social"));
    assert_eq!(config.websocket_url, "/wsclient");
    assert!(config.validate().is_ok());
}

#[test]
fn test_empty_toml_is_default() {
    let config: ServiceConfig = toml::from_str("").unwrap();
    assert_eq!(config, ServiceConfig::default());
}

#[test]
fn test_validation_rejects_contradictions() {
    let offload_without_socket: ServiceConfig = toml::from_str(
        r#"
        [tls]
        address = "0.0.0.0:4202"
        cert_file = "cert.pem"
        key_file = "key.pem"

        [offload]
        enabled = true
        "#,
    )
    .unwrap();
    assert!(offload_without_socket.validate().is_err());

    let bad_quota = ServiceConfig::new().with_command_quota(QuotaConfig::new(1000, 0, 10));
    assert!(bad_quota.validate().is_err());

    let bad_url = ServiceConfig::new().with_websocket_url("wsclient");
    assert!(bad_url.validate().is_err());

    let no_listener = ServiceConfig::new().without_bind_address();
    assert!(no_listener.validate().is_err());
}
