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

//! Benchmarks for telnetcodec performance

use bytes::BytesMut;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use netmush_telnetcodec::{OptionTable, Request, TelnetCodec, TelnetOption, consts, escape_iac};
use std::hint::black_box;
use tokio_util::codec::Decoder;

fn bench_decode_plain_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let line = b"say The quick brown fox jumps over the lazy dog.\r\n".repeat(64);
    group.throughput(Throughput::Bytes(line.len() as u64));

    group.bench_function("plain_text", |b| {
        b.iter(|| {
            let mut codec = TelnetCodec::new();
            let mut buffer = BytesMut::from(&line[..]);
            let mut count = 0usize;
            while let Ok(Some(frame)) = codec.decode(&mut buffer) {
                black_box(frame);
                count += 1;
            }
            count
        });
    });

    let mut mixed = BytesMut::new();
    for _ in 0..64 {
        mixed.extend_from_slice(b"look\r\n");
        mixed.extend_from_slice(&[consts::IAC, consts::SB, consts::option::NAWS, 0, 80, 0, 24]);
        mixed.extend_from_slice(&[consts::IAC, consts::SE]);
    }
    group.bench_function("text_with_subnegotiation", |b| {
        b.iter(|| {
            let mut codec = TelnetCodec::new();
            let mut buffer = mixed.clone();
            while let Ok(Some(frame)) = codec.decode(&mut buffer) {
                black_box(frame);
            }
        });
    });
    group.finish();
}

fn bench_escape(c: &mut Criterion) {
    let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    c.bench_function("escape_iac_4k", |b| {
        let mut dst = BytesMut::with_capacity(8192);
        b.iter(|| {
            dst.clear();
            escape_iac(black_box(&data), &mut dst);
        });
    });
}

fn bench_negotiate(c: &mut Criterion) {
    let table = OptionTable::standard();
    c.bench_function("negotiate_charset", |b| {
        let mut reply = BytesMut::with_capacity(64);
        b.iter(|| {
            reply.clear();
            black_box(table.negotiate(Request::Do, TelnetOption::Charset, &mut reply));
        });
    });
}

criterion_group!(benches, bench_decode_plain_text, bench_escape, bench_negotiate);
criterion_main!(benches);
