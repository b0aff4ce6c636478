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
//! Benchmarks for the per-tick hot paths: HTTP parsing, quota accounting and reboot records

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use netmush_service::{
    HttpRequest, QuotaBucket, QuotaConfig, RebootRecord, RecordFeatures, SessionRecord, TransportKind,
    parse_preamble,
};
use std::hint::black_box;
use std::io::Cursor;

const HEADERS: &[u8] = b"Host: mush.example.com\r\nUser-Agent: bench/1.0\r\nAccept: */*\r\n\
Content-Type: application/json\r\nContent-Length: 27\r\n\r\n{\"who\":\"everyone\",\"n\":10}\r\n";

fn bench_http(c: &mut Criterion) {
    let mut group = c.benchmark_group("http");
    group.throughput(Throughput::Bytes(HEADERS.len() as u64));

    group.bench_function("parse_whole", |b| {
        b.iter(|| {
            let mut request = HttpRequest::parse_request_line("POST /api/who?x=1 HTTP/1.1").unwrap();
            black_box(request.feed(black_box(HEADERS)).unwrap());
        })
    });

    group.bench_function("parse_bytewise", |b| {
        b.iter(|| {
            let mut request = HttpRequest::parse_request_line("POST /api/who HTTP/1.1").unwrap();
            for byte in HEADERS.chunks(1) {
                black_box(request.feed(byte).unwrap());
            }
        })
    });

    group.finish();
}

fn bench_quota(c: &mut Criterion) {
    let config = QuotaConfig::new(1000, 4, 100);
    c.bench_function("quota_take_refill", |b| {
        let mut bucket = QuotaBucket::new(&config);
        b.iter(|| {
            if !bucket.try_take() {
                bucket.refill(black_box(250));
            }
        })
    });
}

fn bench_preamble(c: &mut Criterion) {
    c.bench_function("preamble", |b| {
        b.iter(|| black_box(parse_preamble(black_box(b"203.0.113.7^client.example.com\r\nWHO\r\n"))))
    });
}

fn record(sessions: usize) -> RebootRecord {
    RebootRecord {
        features: RecordFeatures::CURRENT,
        listener: 3,
        local_listener: 4,
        tls_listener: -1,
        max_fd: 4 + sessions as i32,
        sessions: (0..sessions)
            .map(|n| SessionRecord {
                fd: 5 + n as i32,
                connected_at: 1_700_000_000,
                hidden: false,
                cmds: 100,
                player: Some(n as i64),
                last_time: 1_700_000_500,
                prefix: None,
                suffix: None,
                host: format!("host{n}.example.com"),
                ip: format!("198.51.100.{}", n % 250),
                flags: 0x801,
                width: 80,
                height: 24,
                ttype: Some("xterm".to_string()),
                kind: TransportKind::PlainIp,
                checksum: String::new(),
                conn_log_id: n as i64,
            })
            .collect(),
        first_start: 1_690_000_000,
        reboot_count: 3,
        offload_pid: None,
    }
}

fn bench_reboot_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("reboot_record");
    let record = record(500);
    let mut encoded = Vec::new();
    record.write_to(&mut encoded).unwrap();
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("write_500", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(encoded.len());
            record.write_to(&mut out).unwrap();
            black_box(out)
        })
    });
    group.bench_function("read_500", |b| {
        b.iter(|| black_box(RebootRecord::read_from(Cursor::new(&encoded)).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_http, bench_quota, bench_preamble, bench_reboot_record);
criterion_main!(benches);
