// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection id generation and small standalone helpers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic id generator, one instance per role (client
/// connections vs. server connections), matching
/// `examples/original_source/driverConn.go`'s package-level `clientConnId`.
#[derive(Debug, Default)]
pub struct ConnIdGen(AtomicU64);

impl ConnIdGen {
    pub const fn new() -> Self {
        ConnIdGen(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Picks a uniformly random index in `0..len`. `len` must be nonzero.
pub fn random_index(len: usize) -> usize {
    use rand::Rng;
    rand::rng().random_range(0..len)
}
