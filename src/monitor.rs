// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Read-only atomic counters for pools and servers.
//!
//! Grounded on `examples/original_source/monitor.go`'s `ClientStatus`/
//! `ServerStatus`: a handful of counters updated from the hot path with
//! relaxed atomics and exposed through a cheap, `Serialize`-able snapshot
//! rather than the original's hand-rolled JSON string.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-endpoint pool counters.
#[derive(Debug, Default)]
pub struct PoolMonitor {
    read_amount: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolSnapshot {
    pub idle: u64,
    pub working: u64,
    pub creating: u64,
    pub read_amount: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl PoolMonitor {
    pub fn record_read(&self, bytes: usize) {
        self.read_amount.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Samples the counters into a snapshot. The caller fills in
    /// `idle`/`working`/`creating` from the pool's own lists since those
    /// live behind the pool lock, not an atomic.
    pub fn snapshot(&self, idle: u64, working: u64, creating: u64) -> PoolSnapshot {
        PoolSnapshot {
            idle,
            working,
            creating,
            read_amount: self.read_amount.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn read_amount(&self) -> u64 {
        self.read_amount.load(Ordering::Relaxed)
    }
}

/// Per-server counters.
#[derive(Debug, Default)]
pub struct ServerMonitor {
    call_amount: AtomicU64,
    error_amount: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ServerSnapshot {
    pub call_amount: u64,
    pub error_amount: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ServerMonitor {
    pub fn record_call(&self) {
        self.call_amount.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_amount.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            call_amount: self.call_amount.load(Ordering::Relaxed),
            error_amount: self.error_amount.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_snapshot_reflects_recorded_traffic() {
        let m = PoolMonitor::default();
        m.record_read(10);
        m.record_read(5);
        m.record_write(7);
        let snap = m.snapshot(1, 2, 0);
        assert_eq!(snap.read_amount, 2);
        assert_eq!(snap.bytes_read, 15);
        assert_eq!(snap.bytes_written, 7);
        assert_eq!(snap.idle, 1);
        assert_eq!(snap.working, 2);
    }

    #[test]
    fn server_snapshot_reflects_calls_and_errors() {
        let m = ServerMonitor::default();
        m.record_call();
        m.record_call();
        m.record_error();
        let snap = m.snapshot();
        assert_eq!(snap.call_amount, 2);
        assert_eq!(snap.error_amount, 1);
    }
}
