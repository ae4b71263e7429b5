// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `DeadlineShards`: a partitioned deadline-GC scan for accepted
//! connections, grounded on `server.go`'s `TimerPool` — ten independent
//! `connsMap` shards, each scanned by its own goroutine, so one slow scan
//! never stalls connections tracked by another shard.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::server::handler::ServerConnection;

pub struct DeadlineShards {
    shards: Vec<Mutex<HashMap<u64, Arc<ServerConnection>>>>,
    cancel: CancellationToken,
}

impl DeadlineShards {
    /// Starts `shard_count` independent scan loops, each polling its own
    /// shard every `gc_interval`, matching `serveTimerManage`'s one
    /// goroutine per `TimerPool` slot.
    pub fn new(shard_count: usize, gc_interval: Duration) -> Arc<Self> {
        let shards = (0..shard_count.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        let this = Arc::new(DeadlineShards {
            shards,
            cancel: CancellationToken::new(),
        });

        for idx in 0..this.shards.len() {
            let this = this.clone();
            tokio::spawn(async move { this.serve_shard(idx, gc_interval).await });
        }

        this
    }

    /// Starts tracking a freshly accepted connection, sharded by id so the
    /// scan load spreads evenly regardless of accept order.
    pub fn track(&self, conn: Arc<ServerConnection>) {
        let idx = self.shard_index(conn.id);
        self.shards[idx]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conn.id, conn);
    }

    /// Stops tracking a connection that has already closed on its own,
    /// e.g. when the reader loop exits for a reason other than the GC.
    pub fn untrack(&self, id: u64) {
        let idx = self.shard_index(id);
        self.shards[idx].lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn shard_index(&self, id: u64) -> usize {
        (id as usize) % self.shards.len()
    }

    async fn serve_shard(&self, idx: usize, gc_interval: Duration) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(gc_interval) => {}
            }

            let now = Instant::now();
            let expired: Vec<Arc<ServerConnection>> = {
                let shard = self.shards[idx].lock().unwrap_or_else(|e| e.into_inner());
                shard
                    .values()
                    .filter(|conn| conn.read_deadline() <= now || conn.write_deadline() <= now)
                    .cloned()
                    .collect()
            };
            if expired.is_empty() {
                continue;
            }
            let mut shard = self.shards[idx].lock().unwrap_or_else(|e| e.into_inner());
            for conn in &expired {
                shard.remove(&conn.id);
            }
            drop(shard);
            for conn in expired {
                conn.mark_deadline_expired();
            }
        }
    }
}
