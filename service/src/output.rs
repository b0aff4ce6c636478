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

//! Per-session output queue

use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::io::IoSlice;

/// Most chunks handed to a single vectored write
pub const MAX_IOV: usize = 10;

/// Queued when old output is discarded to honor the limit
pub const FLUSHED_MESSAGE: &[u8] = b"\r\n<Output Flushed>\r\n";

/// Ordered byte chunks waiting for the socket.
///
/// The pending total is maintained on every push and consume and always equals the sum of
/// the unconsumed chunk lengths. Empty chunks are never stored, so the queue is empty
/// exactly when it has no head chunk.
#[derive(Debug, Clone)]
pub struct OutputQueue {
    chunks: VecDeque<Bytes>,
    pending: usize,
    limit: usize,
    flushed: u64,
}

impl OutputQueue {
    /// An empty queue holding at most `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            pending: 0,
            limit: limit.max(FLUSHED_MESSAGE.len() * 2),
            flushed: 0,
        }
    }

    /// Append a chunk, discarding the oldest chunks when the limit is exceeded
    pub fn push(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.pending += chunk.len();
        self.chunks.push_back(chunk);
        if self.pending > self.limit {
            self.shed();
        }
    }

    fn shed(&mut self) {
        let mut dropped = 0;
        while self.pending + FLUSHED_MESSAGE.len() > self.limit && self.chunks.len() > 1 {
            if let Some(old) = self.chunks.pop_front() {
                self.pending -= old.len();
                dropped += old.len();
            }
        }
        if dropped > 0 {
            self.flushed += dropped as u64;
            self.pending += FLUSHED_MESSAGE.len();
            self.chunks.push_front(Bytes::from_static(FLUSHED_MESSAGE));
        }
    }

    /// Bytes waiting to be written
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of queued chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes discarded by the limit
    pub fn flushed(&self) -> u64 {
        self.flushed
    }

    /// The head chunks, ready for a vectored write
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.chunks.iter().take(MAX_IOV).map(|chunk| IoSlice::new(chunk)).collect()
    }

    /// The head chunk
    pub fn front(&self) -> Option<&Bytes> {
        self.chunks.front()
    }

    /// Mark `count` bytes as written
    pub fn consume(&mut self, mut count: usize) {
        while count > 0 {
            let Some(head) = self.chunks.front_mut() else {
                break;
            };
            if count >= head.len() {
                count -= head.len();
                self.pending -= head.len();
                self.chunks.pop_front();
            } else {
                head.advance(count);
                self.pending -= count;
                count = 0;
            }
        }
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.pending = 0;
    }
}
