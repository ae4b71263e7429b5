// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `ServerConnection`: one accepted socket's read loop and reply plumbing.
//!
//! Grounded on `server.go`'s `ServeLoop`/`SendFrame`. The original guards
//! `SendFrame` with `conn.Lock()` because replies are written from whatever
//! goroutine finishes a method call, in arbitrary order; here that becomes
//! a `tokio::sync::Mutex` around the encoder, held across the await so a
//! reply's header and body are never interleaved with another task's —
//! the same per-connection write exclusion `client/client.rs`'s
//! `writer: Mutex<OwnedWriteHalf>` uses on the client side.

use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::{net::TcpStream, net::tcp::OwnedWriteHalf, sync::Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{RpcError, well_known},
    monitor::ServerMonitor,
    server::registry::MethodRegistry,
    wire::{CallType, FrameDecoder, FrameEncoder, RequestHeader, ResponseHeader},
};

#[derive(Clone, Copy)]
struct Deadlines {
    read: Instant,
    write: Instant,
}

/// One accepted connection: the shared write side every spawned method
/// invocation replies through, plus the extend-only deadlines the
/// server's deadline-GC shards scan.
pub struct ServerConnection {
    pub id: u64,
    encoder: AsyncMutex<FrameEncoder<OwnedWriteHalf>>,
    deadlines: RwLock<Deadlines>,
    net_error: std::sync::Mutex<Option<RpcError>>,
    closed_by_deadline_gc: AtomicBool,
    cancel: CancellationToken,
    call_count: AtomicU64,
    monitor: Arc<ServerMonitor>,
}

impl ServerConnection {
    fn new(
        id: u64,
        write_half: OwnedWriteHalf,
        idle_timeout: Duration,
        monitor: Arc<ServerMonitor>,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(ServerConnection {
            id,
            encoder: AsyncMutex::new(FrameEncoder::new(write_half)),
            deadlines: RwLock::new(Deadlines {
                read: now + idle_timeout,
                write: now + idle_timeout,
            }),
            net_error: std::sync::Mutex::new(None),
            closed_by_deadline_gc: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            call_count: AtomicU64::new(0),
            monitor,
        })
    }

    pub fn extend_read_deadline(&self, timeout: Duration) -> Result<(), RpcError> {
        self.extend(timeout, true)
    }

    fn extend_write_deadline(&self, timeout: Duration) -> Result<(), RpcError> {
        self.extend(timeout, false)
    }

    fn extend(&self, timeout: Duration, is_read: bool) -> Result<(), RpcError> {
        if self.closed_by_deadline_gc.load(Ordering::Acquire) {
            return Err(well_known::deadline_gc_arrived());
        }
        let mut d = self.deadlines.write().unwrap_or_else(|e| e.into_inner());
        let candidate = Instant::now() + timeout;
        let slot = if is_read { &mut d.read } else { &mut d.write };
        if candidate > *slot {
            *slot = candidate;
        }
        Ok(())
    }

    pub fn read_deadline(&self) -> Instant {
        self.deadlines.read().unwrap_or_else(|e| e.into_inner()).read
    }

    pub fn write_deadline(&self) -> Instant {
        self.deadlines.read().unwrap_or_else(|e| e.into_inner()).write
    }

    /// Called by the deadline GC shard scan: hard-cancels the read loop.
    /// Idempotent.
    pub fn mark_deadline_expired(&self) {
        self.closed_by_deadline_gc.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn latch_net_error(&self, err: RpcError) {
        let mut guard = self.net_error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    /// `SendFrame`: checks the latched net error, extends the write
    /// deadline, writes the header and optional body, and flushes — all
    /// under the encoder lock so concurrent replies never interleave.
    async fn send_frame(&self, header: ResponseHeader, body: Option<Bytes>) {
        {
            let guard = self.net_error.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_some() {
                return;
            }
        }
        if self.extend_write_deadline(Duration::from_secs(30)).is_err() {
            return;
        }
        let mut encoder = self.encoder.lock().await;
        let result = async {
            encoder.encode_value(&header).await?;
            if let Some(b) = &body {
                encoder.encode_raw_frame(b).await?;
            }
            encoder.flush().await
        }
        .await;
        drop(encoder);
        match result {
            Ok(()) => {
                self.monitor.record_write(1);
                if let Some(b) = &body {
                    self.monitor.record_write(b.len());
                }
            }
            Err(e) => {
                self.latch_net_error(e.into());
                self.cancel.cancel();
            }
        }
    }

    async fn reply_pong(&self, seq: u64) {
        self.send_frame(ResponseHeader::pong(seq), None).await;
    }

    async fn reply_ack(&self, seq: u64) {
        self.send_frame(ResponseHeader::ack(seq), None).await;
    }

    async fn reply_ack_error(&self, seq: u64, err: RpcError) {
        self.send_frame(ResponseHeader::ack_error(seq, err), None).await;
    }

    async fn reply_data(&self, seq: u64, body: Bytes) {
        self.send_frame(ResponseHeader::data(seq), Some(body)).await;
    }
}

/// Spawns the read loop for one accepted socket and returns the shared
/// connection handle, so the caller (the server's deadline-GC shard) can
/// scan its deadlines without holding up the read loop itself.
///
/// Implements spec.md §4.6's per-driver loop: extend the read deadline,
/// decode a header, dispatch pings inline, reject unknown
/// `(service, method)` pairs with a 400 ack, decode the argument
/// synchronously (a parse failure is the same non-fatal 400 ack), then
/// hand the already-decoded argument to a spawned task — fire-and-forget
/// for `sendOnly`, reply-bearing otherwise.
pub fn serve_connection(
    id: u64,
    stream: TcpStream,
    registry: Arc<MethodRegistry>,
    idle_timeout: Duration,
    monitor: Arc<ServerMonitor>,
    on_exit: Arc<dyn Fn(u64) + Send + Sync>,
) -> Arc<ServerConnection> {
    let (read_half, write_half) = stream.into_split();
    let conn = ServerConnection::new(id, write_half, idle_timeout, monitor.clone());

    let loop_conn = conn.clone();
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new(read_half);
        loop {
            if loop_conn.extend_read_deadline(idle_timeout).is_err() {
                break;
            }
            tokio::select! {
                _ = loop_conn.cancel.cancelled() => break,
                decoded = decoder.decode_value::<RequestHeader>() => {
                    let header = match decoded {
                        Ok(h) => h,
                        Err(e) => {
                            loop_conn.latch_net_error(e.into());
                            break;
                        }
                    };
                    loop_conn.call_count.fetch_add(1, Ordering::Relaxed);
                    monitor.record_call();

                    if header.is_ping() {
                        loop_conn.reply_pong(header.seq).await;
                        continue;
                    }

                    let Some(entry) = registry.lookup(&header.service, &header.method) else {
                        if let Err(e) = decoder.discard_frame().await {
                            loop_conn.latch_net_error(e.into());
                            break;
                        }
                        monitor.record_error();
                        loop_conn.reply_ack_error(header.seq, well_known::invalid_request()).await;
                        continue;
                    };

                    let body = match decoder.read_raw_frame().await {
                        Ok(b) => b,
                        Err(e) => {
                            loop_conn.latch_net_error(e.into());
                            break;
                        }
                    };

                    let arg = match entry.decode(&body) {
                        Ok(arg) => arg,
                        Err(e) => {
                            monitor.record_error();
                            loop_conn.reply_ack_error(header.seq, e).await;
                            continue;
                        }
                    };

                    match header.call_type {
                        CallType::SendOnly => {
                            loop_conn.reply_ack(header.seq).await;
                            tokio::spawn(async move {
                                let _ = entry.invoke(arg).await;
                            });
                        }
                        CallType::Normal => {
                            let reply_conn = loop_conn.clone();
                            tokio::spawn(async move {
                                match entry.invoke(arg).await {
                                    Ok(reply_bytes) => reply_conn.reply_data(header.seq, reply_bytes).await,
                                    Err(e) => {
                                        reply_conn.reply_ack_error(header.seq, e).await;
                                    }
                                }
                            });
                        }
                    }
                }
            }
        }
        loop_conn.close();
        on_exit(id);
    });

    conn
}
