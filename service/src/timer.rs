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

//! Hard deadlines held outside the poll timeout

use crate::types::SessionId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// What a session timer does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// Send the telnet probe
    TelnetProbe,
    /// Send the login banner
    Welcome,
    /// Run or abandon a stalled HTTP request
    HttpFallback,
    /// Abort a TLS handshake that is taking too long
    TlsHandshake,
}

/// Identifies one scheduled timer. Sessions keep the token of the timer they still want and
/// ignore any other that fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    deadline: Instant,
    token: TimerToken,
    session: SessionId,
    kind: TimerKind,
}

/// A fired timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    /// The token handed out by [`TimerQueue::schedule`]
    pub token: TimerToken,
    /// Session the timer belongs to
    pub session: SessionId,
    /// What to do
    pub kind: TimerKind,
}

/// Min-heap of session deadlines. Cancelled timers are not removed; the owning session
/// simply stops recognizing their token.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_token: u64,
}

impl TimerQueue {
    /// An empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` for `session` after `delay`
    pub fn schedule(&mut self, session: SessionId, kind: TimerKind, now: Instant, delay: Duration) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.heap.push(Reverse(Entry {
            deadline: now + delay,
            token,
            session,
            kind,
        }));
        token
    }

    /// Time until the earliest deadline, zero when one is already due
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|Reverse(entry)| entry.deadline.saturating_duration_since(now))
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn expired(&mut self, now: Instant) -> Vec<Expired> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = *entry;
            self.heap.pop();
            due.push(Expired {
                token: entry.token,
                session: entry.session,
                kind: entry.kind,
            });
        }
        due
    }

    /// Number of scheduled timers, cancelled ones included
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
