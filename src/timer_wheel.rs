// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A coarse, sharded hashed timing wheel.
//!
//! Grounded on `examples/original_source/timeWheel/time.go`: each shard is a
//! ring buffer of one-shot slots advanced by a periodic ticker. `add_timer`
//! places the caller in the bucket `ticks` slots ahead of the wheel's
//! current position and hands back a future that resolves the next time
//! that bucket is reached. The contract is coarse by design: `expiry ≤
//! actual wakeup ≤ expiry + tick`. This is cheaper than one
//! `tokio::time::sleep` per in-flight call, at the cost of precision.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Default tick interval and bucket count, matching the reference
/// implementation's `DefaultInterval`/`DefaultBucketSize`.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);
pub const DEFAULT_BUCKETS: usize = 600;
/// Default shard count, matching `DefaultWheelPoolSize`.
pub const DEFAULT_SHARDS: usize = 5;

struct Shard {
    tick: Duration,
    buckets: Mutex<Vec<Arc<Notify>>>,
    tail: AtomicUsize,
}

impl Shard {
    fn new(tick: Duration, bucket_count: usize) -> Self {
        Shard {
            tick,
            buckets: Mutex::new((0..bucket_count).map(|_| Arc::new(Notify::new())).collect()),
            tail: AtomicUsize::new(0),
        }
    }

    fn max_timeout(&self) -> Duration {
        let len = self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len();
        self.tick * (len.saturating_sub(1) as u32)
    }

    fn add_timer(&self, timeout: Duration) -> Arc<Notify> {
        if timeout.is_zero() {
            let n = Arc::new(Notify::new());
            n.notify_waiters();
            return n;
        }
        let clamped = timeout.min(self.max_timeout());
        let ticks = (clamped.as_nanos() / self.tick.as_nanos().max(1)).max(1) as usize;

        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let len = buckets.len();
        let tail = self.tail.load(Ordering::Acquire);
        let idx = (tail + ticks) % len;
        buckets[idx].clone()
    }

    fn advance(&self) -> Arc<Notify> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let len = buckets.len();
        let tail = self.tail.fetch_add(1, Ordering::AcqRel) % len;
        std::mem::replace(&mut buckets[tail], Arc::new(Notify::new()))
    }
}

/// A sharded timer wheel. Cloned handles share the same background ticker
/// tasks; dropping every handle stops them via the embedded cancellation
/// token.
#[derive(Clone)]
pub struct TimerWheel {
    shards: Arc<Vec<Shard>>,
    cancel: CancellationToken,
}

impl TimerWheel {
    pub fn new(tick: Duration, bucket_count: usize, shard_count: usize) -> Self {
        let shards: Arc<Vec<Shard>> = Arc::new(
            (0..shard_count.max(1))
                .map(|_| Shard::new(tick, bucket_count.max(1)))
                .collect(),
        );
        let cancel = CancellationToken::new();

        for shard_idx in 0..shards.len() {
            let shards = shards.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(tick);
                ticker.tick().await; // first tick fires immediately, discard
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            shards[shard_idx].advance().notify_waiters();
                        }
                    }
                }
            });
        }

        TimerWheel { shards, cancel }
    }

    /// Returns the wheel's own defaults (1s tick, 600 buckets, 5 shards).
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TICK, DEFAULT_BUCKETS, DEFAULT_SHARDS)
    }

    /// Registers a one-shot timer that fires no sooner than `timeout` and no
    /// later than `timeout` plus one tick, picking a shard at random to
    /// spread contention across the wheel's locks.
    pub fn add_timer(&self, timeout: Duration) -> Arc<Notify> {
        let idx = rand::rng().random_range(0..self.shards.len());
        self.shards[idx].add_timer(timeout)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        // Only the last handle tears down the ticker tasks in practice,
        // since Arc<Vec<Shard>> keeps them alive for clones; cancelling
        // here is harmless for earlier drops and correct for the last one.
        if Arc::strong_count(&self.shards) == 1 {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_timeout_fires_immediately() {
        let wheel = TimerWheel::new(Duration::from_millis(50), 8, 1);
        let notify = wheel.add_timer(Duration::ZERO);
        tokio::time::timeout(Duration::from_millis(10), notify.notified())
            .await
            .expect("zero timeout should resolve without waiting for a tick");
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_within_one_tick_of_expiry() {
        let wheel = TimerWheel::new(Duration::from_millis(20), 16, 1);
        let notify = wheel.add_timer(Duration::from_millis(50));
        let waiter = tokio::spawn(async move {
            notify.notified().await;
        });
        tokio::time::advance(Duration::from_millis(90)).await;
        tokio::time::timeout(Duration::from_millis(10), waiter)
            .await
            .expect("timer task should have completed")
            .expect("timer task should not panic");
    }
}
