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

//! Millisecond token buckets for command and HTTP admission

use crate::config::QuotaConfig;
use std::time::Duration;

/// A token bucket measured in milliseconds of credit.
///
/// Credit accrues one millisecond per elapsed millisecond and never exceeds the ceiling.
/// Spending one unit costs `slice_ms / per_slice` milliseconds and is refused outright when
/// the credit is short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaBucket {
    credit_ms: u64,
    cost_ms: u64,
    ceiling_ms: u64,
}

impl QuotaBucket {
    /// A full bucket
    pub fn new(config: &QuotaConfig) -> Self {
        let cost_ms = config.cost_ms().max(1);
        let ceiling_ms = config.ceiling_ms().max(cost_ms);
        Self {
            credit_ms: ceiling_ms,
            cost_ms,
            ceiling_ms,
        }
    }

    /// A bucket holding `units` whole units, clamped to the ceiling
    pub fn with_units(config: &QuotaConfig, units: u32) -> Self {
        let mut bucket = Self::new(config);
        bucket.credit_ms = (bucket.cost_ms * u64::from(units)).min(bucket.ceiling_ms);
        bucket
    }

    /// Add `elapsed_ms` of credit
    pub fn refill(&mut self, elapsed_ms: u64) {
        self.credit_ms = self.credit_ms.saturating_add(elapsed_ms).min(self.ceiling_ms);
    }

    /// Spend one unit if the credit covers it
    pub fn try_take(&mut self) -> bool {
        if self.credit_ms >= self.cost_ms {
            self.credit_ms -= self.cost_ms;
            true
        } else {
            false
        }
    }

    /// True when one unit is available
    pub fn has_unit(&self) -> bool {
        self.credit_ms >= self.cost_ms
    }

    /// Whole units available
    pub fn units(&self) -> u64 {
        self.credit_ms / self.cost_ms
    }

    /// Raw credit in milliseconds
    pub fn credit_ms(&self) -> u64 {
        self.credit_ms
    }

    /// Ceiling in milliseconds
    pub fn ceiling_ms(&self) -> u64 {
        self.ceiling_ms
    }

    /// Time until one unit is available, or `None` when one already is
    pub fn until_next_unit(&self) -> Option<Duration> {
        if self.has_unit() {
            None
        } else {
            Some(Duration::from_millis(self.cost_ms - self.credit_ms))
        }
    }

    /// Fill to the ceiling
    pub fn reset(&mut self) {
        self.credit_ms = self.ceiling_ms;
    }
}
