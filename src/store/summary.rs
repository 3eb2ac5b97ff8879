// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

/// Aggregate produced by scanning a store: block count, total bytes
/// and a power-of-two size histogram keyed by `size.ilog2()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub count: u64,
    pub total_size: u64,
    pub buckets: BTreeMap<u32, u64>,
}

impl Summary {
    /// Fold one block of `size` bytes into the summary.
    pub fn update(&mut self, size: u64) {
        debug_assert!(size > 0);
        self.count += 1;
        self.total_size += size;
        *self.buckets.entry(size.ilog2()).or_default() += 1;
    }

    /// Merge another partial summary into this one.
    pub fn merge(&mut self, other: &Summary) {
        self.count += other.count;
        self.total_size += other.total_size;
        for (bucket, count) in &other.buckets {
            *self.buckets.entry(*bucket).or_default() += count;
        }
    }
}
