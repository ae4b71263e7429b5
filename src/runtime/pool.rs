// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `ConnectionPool`: a bounded set of [`ConnectionDriver`]s for one
//! endpoint address.
//!
//! Grounded on `examples/original_source/connPool.go`'s `ConnPool`/
//! `OpensPool`, translated from an intrusive `container/list` pair to a
//! `DashMap<id, Arc<ConnectionDriver>>` plus two `VecDeque<id>` ordering
//! lists, per spec.md §9's "a map `id → driver`... when intrusive lists
//! are awkward" guidance — the teacher's own preference for `DashMap`
//! over hand-rolled intrusive lists (`client/pool_sessions.rs`) is the
//! grounding for that substitution.
//!
//! `working` only ever grows at connection creation and shrinks on
//! removal — it is the round-robin rotation list, not a "currently busy"
//! set. `idle` is the much smaller subset currently eligible for
//! `pop_idle`; a driver can sit in `working` without being in `idle`
//! while it carries pending responses, exactly as
//! `OpensPool.MarkAsIdle`/`IdlePopFront` behave in the reference
//! implementation.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::config::PoolConfig,
    error::{RpcError, well_known},
    monitor::{PoolMonitor, PoolSnapshot},
    runtime::driver::{ConnectionDriver, PoolHooks},
    utils::ConnIdGen,
};

/// Distinguishes a malformed endpoint address from a transport-level
/// refusal, mirroring the reference implementation's separate "invalid
/// address" and "connect failed" error codes.
fn classify_connect_error(err: &std::io::Error) -> RpcError {
    use std::io::ErrorKind as IoKind;
    match err.kind() {
        IoKind::InvalidInput | IoKind::AddrNotAvailable => {
            well_known::invalid_address().with_reason(err.to_string())
        }
        _ => well_known::connect_fail().with_reason(err.to_string()),
    }
}

struct Lists {
    working: VecDeque<u64>,
    idle: VecDeque<u64>,
    creating: usize,
}

/// Round-robin/idle-pool of connections dialed to a single address.
pub struct ConnectionPool {
    address: String,
    config: PoolConfig,
    ping_write_timeout: Duration,
    drivers: DashMap<u64, Arc<ConnectionDriver>>,
    lists: Mutex<Lists>,
    monitor: Arc<PoolMonitor>,
    conn_ids: ConnIdGen,
    cancel: CancellationToken,
    weak_self: OnceCell<Weak<ConnectionPool>>,
}

impl ConnectionPool {
    /// Creates the pool and starts its idle-ping and deadline-GC
    /// background loops, mirroring `NewConnPool`'s `go cp.ServeIdlePing()`.
    ///
    /// `ping_write_timeout` is the client's global write timeout, reused
    /// for the reserved ping request since pings are not calls with their
    /// own resolved timeout.
    pub fn new(
        address: impl Into<String>,
        config: PoolConfig,
        ping_write_timeout: Duration,
    ) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool {
            address: address.into(),
            config,
            ping_write_timeout,
            drivers: DashMap::new(),
            lists: Mutex::new(Lists {
                working: VecDeque::new(),
                idle: VecDeque::new(),
                creating: 0,
            }),
            monitor: Arc::new(PoolMonitor::default()),
            conn_ids: ConnIdGen::new(),
            cancel: CancellationToken::new(),
            weak_self: OnceCell::new(),
        });
        let _ = pool.weak_self.set(Arc::downgrade(&pool));

        let idle_ping = pool.clone();
        tokio::spawn(async move { idle_ping.serve_idle_ping().await });
        let deadline_gc = pool.clone();
        tokio::spawn(async move { deadline_gc.serve_deadline_gc().await });

        pool
    }

    pub fn monitor(&self) -> &Arc<PoolMonitor> {
        &self.monitor
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        self.monitor.snapshot(
            lists.idle.len() as u64,
            lists.working.len() as u64,
            lists.creating as u64,
        )
    }

    /// Stops the background idle-ping and deadline-GC loops. Connections
    /// already handed out keep running; this only retires the pool.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Implements spec.md §4.4's `acquire(connectTimeout, allowInFlightShare)`.
    pub async fn acquire(
        &self,
        connect_timeout: Duration,
        allow_in_flight_share: bool,
    ) -> Result<Arc<ConnectionDriver>, RpcError> {
        // Step 1: idle connections are always preferred, regardless of
        // the sharing flag.
        if let Some(driver) = self.pop_idle() {
            return Ok(driver);
        }

        // Step 2: a caller explicitly asking to share in-flight work (a
        // retry) either gets a working driver now or fails immediately —
        // it does not wait for a new connection to be dialed.
        if allow_in_flight_share {
            return self.rotate_working().ok_or_else(well_known::no_working_conn);
        }

        let start = Instant::now();
        loop {
            // Step 3: room to grow the pool.
            let should_dial = {
                let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
                if lists.working.len() + lists.creating < self.config.max_open_conns {
                    lists.creating += 1;
                    true
                } else {
                    false
                }
            };
            if should_dial {
                return self.dial_and_register(connect_timeout).await;
            }

            // Step 4: pool is at capacity — degrade to sharing a working
            // connection even though the caller did not ask to share.
            if let Some(driver) = self.rotate_working() {
                return Ok(driver);
            }

            // Step 5: everyone is busy creating or working; poll until the
            // deadline.
            if start.elapsed() >= connect_timeout {
                return Err(well_known::connect_timeout());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn pop_idle(&self) -> Option<Arc<ConnectionDriver>> {
        let id = {
            let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
            lists.idle.pop_front()?
        };
        self.drivers.get(&id).map(|e| e.clone())
    }

    /// `WorkingMoveFrontToBack`: moves the front working entry to the
    /// back and returns it, spreading multiplexed load round-robin.
    fn rotate_working(&self) -> Option<Arc<ConnectionDriver>> {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        let id = lists.working.pop_front()?;
        lists.working.push_back(id);
        self.drivers.get(&id).map(|e| e.clone())
    }

    async fn dial_and_register(
        &self,
        connect_timeout: Duration,
    ) -> Result<Arc<ConnectionDriver>, RpcError> {
        let dial = async {
            TcpStream::connect(&self.address)
                .await
                .map_err(|e| classify_connect_error(&e))
        };
        let result = tokio::time::timeout(connect_timeout, dial)
            .await
            .unwrap_or_else(|_| Err(well_known::connect_timeout()));

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
                lists.creating -= 1;
                return Err(e);
            }
        };

        let id = self.conn_ids.next();
        let (read_half, write_half) = stream.into_split();
        let weak = self
            .weak_self
            .get()
            .cloned()
            .expect("weak_self set in new()");
        let hooks = PoolHooks {
            on_idle: {
                let weak = weak.clone();
                Arc::new(move |id| {
                    if let Some(pool) = weak.upgrade() {
                        pool.mark_idle(id);
                    }
                })
            },
            on_exit: {
                let weak = weak.clone();
                Arc::new(move |id| {
                    if let Some(pool) = weak.upgrade() {
                        pool.remove(id);
                    }
                })
            },
        };

        // The reader re-extends the read deadline by this sliding window on
        // every iteration, independent of any single call's own timeout —
        // it exists so a silently wedged socket still gets reclaimed by the
        // deadline GC while healthy traffic keeps pushing the deadline out.
        let reader_idle_window = self.config.peer_idle_timeout + Duration::from_secs(10);
        let driver = ConnectionDriver::spawn(
            id,
            read_half,
            write_half,
            self.config.pending_mailbox_capacity,
            reader_idle_window,
            self.ping_write_timeout,
            self.monitor.clone(),
            hooks,
        );

        self.drivers.insert(id, driver.clone());
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.creating -= 1;
        lists.working.push_back(id);
        Ok(driver)
    }

    fn mark_idle(&self, id: u64) {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        if !lists.idle.contains(&id) {
            lists.idle.push_back(id);
        }
    }

    fn remove(&self, id: u64) {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.working.retain(|&x| x != id);
        lists.idle.retain(|&x| x != id);
        drop(lists);
        self.drivers.remove(&id);
    }

    /// Mirrors `ServeIdlePing`: under the lock, partitions the idle list
    /// into ping candidates and eviction candidates; outside the lock,
    /// pings the former and force-closes the latter.
    async fn serve_idle_ping(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.ping_interval) => {}
            }

            let now = Instant::now();
            let (ping_candidates, evicted): (Vec<u64>, Vec<u64>) = {
                let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
                let max_idle = self.config.max_idle_conns;
                let all: Vec<u64> = lists.idle.iter().copied().collect();
                let (keep, evict): (Vec<u64>, Vec<u64>) = if all.len() > max_idle {
                    (all[..max_idle].to_vec(), all[max_idle..].to_vec())
                } else {
                    (all, Vec::new())
                };
                for id in &evict {
                    lists.idle.retain(|&x| x != *id);
                }
                (keep, evict)
            };

            for id in evicted {
                if let Some((_, driver)) = self.drivers.remove(&id) {
                    let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
                    lists.working.retain(|&x| x != id);
                    drop(lists);
                    driver.close();
                }
            }

            for id in ping_candidates {
                let Some(driver) = self.drivers.get(&id).map(|e| e.clone()) else {
                    continue;
                };
                let idle_for = now.saturating_duration_since(driver.last_use());
                if idle_for > self.config.ping_interval
                    && idle_for < 2 * self.config.peer_idle_timeout
                {
                    let _ = driver.send_ping();
                }
            }
        }
    }

    /// Mirrors the deadline GC described in spec.md §4.4: snapshot
    /// expired drivers under the lock, close them outside it.
    async fn serve_deadline_gc(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.deadline_gc_interval) => {}
            }

            let now = Instant::now();
            let expired: Vec<u64> = self
                .drivers
                .iter()
                .filter(|e| e.value().read_deadline() <= now || e.value().write_deadline() <= now)
                .map(|e| *e.key())
                .collect();

            for id in &expired {
                let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
                lists.working.retain(|&x| x != *id);
                lists.idle.retain(|&x| x != *id);
            }
            for id in expired {
                if let Some(driver) = self.drivers.get(&id).map(|e| e.clone()) {
                    driver.mark_deadline_expired();
                }
            }
        }
    }
}
