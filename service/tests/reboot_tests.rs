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
//! Reboot record persistence through the file system

use netmush_service::{RebootRecord, RecordFeatures, SessionRecord, TransportKind};
use tempfile::TempDir;

fn session(fd: i32, player: Option<i64>) -> SessionRecord {
    SessionRecord {
        fd,
        connected_at: 1_700_000_000,
        hidden: false,
        cmds: 12,
        player,
        last_time: 1_700_000_100,
        prefix: Some("<<".to_string()),
        suffix: None,
        host: "client.example.com".to_string(),
        ip: "203.0.113.7".to_string(),
        flags: 0x1,
        width: 132,
        height: 40,
        ttype: Some("xterm \"quoted\"\nline".to_string()),
        kind: TransportKind::TlsProxy,
        checksum: String::new(),
        conn_log_id: 77,
    }
}

#[test]
fn test_record_survives_file_and_is_consumed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reboot.db");
    let record = RebootRecord {
        features: RecordFeatures::CURRENT,
        listener: 3,
        local_listener: 4,
        tls_listener: -1,
        max_fd: 8,
        sessions: vec![session(7, Some(42)), session(8, None)],
        first_start: 1_699_000_000,
        reboot_count: 2,
        offload_pid: Some(4321),
    };
    record.save(&path).unwrap();
    assert!(path.exists());

    let loaded = RebootRecord::load(&path).unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(!path.exists());
    assert!(RebootRecord::load(&path).unwrap().is_none());
}

#[test]
fn test_garbage_record_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reboot.db");
    std::fs::write(&path, "not a reboot record\n").unwrap();
    assert!(RebootRecord::load(&path).is_err());
}
