// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `ConnectionDriver`: one multiplexed duplex connection.
//!
//! Grounded on `client/client.rs`'s `ClientConnection` — a reader task and
//! a writer task sharing a correlation table keyed by sequence number,
//! talking to each other through a bounded mailbox instead of calling into
//! one another directly. The state this driver owns is split three ways,
//! matching spec.md §5's lock-ordering rule (pool lock → driver lock →
//! deadline lock):
//!
//! - `inner` (a plain `Mutex`, no `.await` ever held across it): sequence
//!   counter, pending-response table, the latched network error, and the
//!   bookkeeping the pool's idle scan reads (`last_use`, `call_count`).
//! - `deadlines` (a separate `RwLock`): extend-only read/write deadlines,
//!   so the deadline-GC scan never blocks behind a caller merely extending
//!   its own deadline.
//! - everything else is either atomic or fixed for the driver's lifetime.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicI32, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::{
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{RpcError, well_known},
    monitor::PoolMonitor,
    wire::{CallType, FrameDecoder, FrameEncoder, ReplyType, RequestHeader, ResponseHeader},
};

pub type Seq = u64;

/// The outcome the reader hands back to a caller blocked on a call.
#[derive(Debug)]
pub enum CallOutcome {
    Reply(Bytes),
    Ack,
    Error(RpcError),
}

struct PendingEntry {
    tx: oneshot::Sender<CallOutcome>,
}

/// A caller-owned flag letting the writer skip a request whose caller has
/// already timed out, without the writer needing to touch the pending
/// table under its own lock acquisition for the common case.
#[derive(Clone)]
pub struct PendingFlag(Arc<AtomicI32>);

impl PendingFlag {
    fn new() -> Self {
        PendingFlag(Arc::new(AtomicI32::new(1)))
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) > 0
    }
}

struct QueuedRequest {
    seq: Seq,
    header: RequestHeader,
    body: Option<Bytes>,
    pending: PendingFlag,
    write_timeout: Duration,
}

/// A registered, in-flight call: what the caller awaits plus the means to
/// cancel delivery if its own timer fires first.
pub struct PendingCall {
    pub flag: PendingFlag,
    pub rx: oneshot::Receiver<CallOutcome>,
    pub seq: Seq,
}

struct DriverInner {
    sequence: Seq,
    pending: HashMap<Seq, PendingEntry>,
    net_error: Option<RpcError>,
    last_use: Instant,
    call_count: u64,
}

#[derive(Clone, Copy)]
struct Deadlines {
    read: Instant,
    write: Instant,
}

/// Pool callbacks the reader task drives as the connection's state
/// changes. Kept as a small bundle rather than two loose closures so
/// `spawn`'s signature stays readable.
#[derive(Clone)]
pub struct PoolHooks {
    /// Called whenever the pending table becomes empty after a delivered
    /// response, i.e. the driver is eligible to rest in the idle list.
    pub on_idle: Arc<dyn Fn(u64) + Send + Sync>,
    /// Called exactly once, when the reader task exits for good.
    pub on_exit: Arc<dyn Fn(u64) + Send + Sync>,
}

/// One multiplexed duplex connection: a reader task, a writer task, and
/// the shared state they correlate through.
pub struct ConnectionDriver {
    pub id: u64,
    inner: Mutex<DriverInner>,
    deadlines: RwLock<Deadlines>,
    closed_by_deadline_gc: AtomicBool,
    mailbox: Mutex<Option<mpsc::Sender<QueuedRequest>>>,
    /// Told by the writer when it hits a fatal error, so the reader's
    /// blocked read is raced against cancellation rather than left to hang.
    cancel: CancellationToken,
    /// Told by the reader on exit, so a healthy writer stops enqueuing new
    /// frames onto a connection nobody will read responses from again.
    exit_write: CancellationToken,
    ping_write_timeout: Duration,
}

impl ConnectionDriver {
    /// Spawns the reader and writer tasks for a freshly dialed connection
    /// and returns the shared driver handle.
    pub fn spawn(
        id: u64,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
        mailbox_capacity: usize,
        read_timeout: Duration,
        ping_write_timeout: Duration,
        monitor: Arc<PoolMonitor>,
        hooks: PoolHooks,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let now = Instant::now();
        let driver = Arc::new(ConnectionDriver {
            id,
            inner: Mutex::new(DriverInner {
                sequence: 0,
                pending: HashMap::new(),
                net_error: None,
                last_use: now,
                call_count: 0,
            }),
            deadlines: RwLock::new(Deadlines {
                read: now + read_timeout,
                write: now + read_timeout,
            }),
            closed_by_deadline_gc: AtomicBool::new(false),
            mailbox: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
            exit_write: CancellationToken::new(),
            ping_write_timeout,
        });

        let writer_monitor = monitor.clone();

        let reader_driver = driver.clone();
        tokio::spawn(async move {
            reader_driver
                .clone()
                .reader_loop(FrameDecoder::new(read_half), read_timeout, monitor, hooks)
                .await;
        });

        let writer_driver = driver.clone();
        tokio::spawn(async move {
            writer_driver
                .clone()
                .writer_loop(FrameEncoder::new(write_half), rx, writer_monitor)
                .await;
        });

        driver
    }

    // ---- call submission -------------------------------------------------

    /// Assigns a sequence number, enqueues the frame, and registers a
    /// pending-response slot, all under the driver lock — "transfer" in
    /// spec.md's terms.
    pub fn transfer_call(
        &self,
        service: &str,
        method: &str,
        call_type: CallType,
        body: Bytes,
        write_timeout: Duration,
    ) -> Result<PendingCall, RpcError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = &inner.net_error {
            return Err(err.clone());
        }
        inner.sequence += 1;
        let seq = inner.sequence;
        let header = RequestHeader {
            service: service.to_string(),
            method: method.to_string(),
            seq,
            call_type,
        };
        let flag = PendingFlag::new();
        let queued = QueuedRequest {
            seq,
            header,
            body: Some(body),
            pending: flag.clone(),
            write_timeout,
        };
        self.send_to_mailbox(queued)?;
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(seq, PendingEntry { tx });
        inner.call_count += 1;
        inner.last_use = Instant::now();
        Ok(PendingCall { flag, rx, seq })
    }

    /// Sends a reserved `"go"."p"` ping, fire-and-forget: the server acks
    /// with a pong the reader recognizes and drops, so no pending-response
    /// entry is registered for it.
    pub fn send_ping(&self) -> Result<(), RpcError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = &inner.net_error {
            return Err(err.clone());
        }
        inner.sequence += 1;
        let seq = inner.sequence;
        drop(inner);
        self.send_to_mailbox(QueuedRequest {
            seq,
            header: RequestHeader::ping(seq),
            body: None,
            pending: PendingFlag::new(),
            write_timeout: self.ping_write_timeout,
        })
    }

    fn send_to_mailbox(&self, req: QueuedRequest) -> Result<(), RpcError> {
        use tokio::sync::mpsc::error::TrySendError;

        let guard = self.mailbox.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.try_send(req).map_err(|e| match e {
                TrySendError::Full(_) => well_known::pending_mailbox_full(),
                TrySendError::Closed(_) => well_known::wire_broken(),
            }),
            None => Err(well_known::wire_broken()),
        }
    }

    fn take_pending(&self, seq: Seq) -> Option<PendingEntry> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .remove(&seq)
    }

    // ---- deadlines ---------------------------------------------------------

    /// Extends the read deadline forward only; rejects the extension once
    /// the deadline GC has already claimed this connection.
    pub fn extend_read_deadline(&self, timeout: Duration) -> Result<(), RpcError> {
        if self.closed_by_deadline_gc.load(Ordering::Acquire) {
            return Err(well_known::deadline_gc_arrived());
        }
        let mut d = self.deadlines.write().unwrap_or_else(|e| e.into_inner());
        let candidate = Instant::now() + timeout;
        if candidate > d.read {
            d.read = candidate;
        }
        Ok(())
    }

    pub fn extend_write_deadline(&self, timeout: Duration) -> Result<(), RpcError> {
        if self.closed_by_deadline_gc.load(Ordering::Acquire) {
            return Err(well_known::deadline_gc_arrived());
        }
        let mut d = self.deadlines.write().unwrap_or_else(|e| e.into_inner());
        let candidate = Instant::now() + timeout;
        if candidate > d.write {
            d.write = candidate;
        }
        Ok(())
    }

    pub fn read_deadline(&self) -> Instant {
        self.deadlines.read().unwrap_or_else(|e| e.into_inner()).read
    }

    pub fn write_deadline(&self) -> Instant {
        self.deadlines.read().unwrap_or_else(|e| e.into_inner()).write
    }

    /// Called by the deadline GC: marks the connection for reclamation and
    /// hard-cancels both tasks. Idempotent.
    pub fn mark_deadline_expired(&self) {
        self.closed_by_deadline_gc.store(true, Ordering::Release);
        self.cancel.cancel();
        self.exit_write.cancel();
    }

    // ---- idle/working status, read by the pool under the pool lock --------

    pub fn is_idle_candidate(&self) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.is_empty() && inner.net_error.is_none()
    }

    pub fn is_broken(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .net_error
            .is_some()
    }

    pub fn last_use(&self) -> Instant {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last_use
    }

    pub fn close(&self) {
        self.cancel.cancel();
        self.exit_write.cancel();
    }

    // ---- task bodies --------------------------------------------------------

    async fn reader_loop(
        self: Arc<Self>,
        mut decoder: FrameDecoder<OwnedReadHalf>,
        read_timeout: Duration,
        monitor: Arc<PoolMonitor>,
        hooks: PoolHooks,
    ) {
        loop {
            if self.extend_read_deadline(read_timeout).is_err() {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                decoded = decoder.decode_value::<ResponseHeader>() => {
                    let header = match decoded {
                        Ok(h) => h,
                        Err(e) => {
                            self.latch_net_error(e.into());
                            break;
                        }
                    };
                    monitor.record_read(1);
                    if header.reply_type.contains(ReplyType::PONG) {
                        continue;
                    }
                    let body = if header.reply_type.have_reply() {
                        match decoder.read_raw_frame().await {
                            Ok(b) => {
                                monitor.record_read(b.len());
                                Some(b)
                            }
                            Err(e) => {
                                self.latch_net_error(e.into());
                                break;
                            }
                        }
                    } else {
                        None
                    };
                    let Some(entry) = self.take_pending(header.seq) else { continue };
                    let outcome = match header.err {
                        Some(err) => CallOutcome::Error(err),
                        None => match body {
                            Some(b) => CallOutcome::Reply(b),
                            None => CallOutcome::Ack,
                        },
                    };
                    let _ = entry.tx.send(outcome);
                    if self.mark_settled_and_check_idle() {
                        (hooks.on_idle)(self.id);
                    }
                }
            }
        }

        self.on_reader_exit();
        (hooks.on_exit)(self.id);
    }

    async fn writer_loop(
        self: Arc<Self>,
        mut encoder: FrameEncoder<OwnedWriteHalf>,
        mut rx: mpsc::Receiver<QueuedRequest>,
        monitor: Arc<PoolMonitor>,
    ) {
        loop {
            tokio::select! {
                _ = self.exit_write.cancelled() => break,
                maybe_req = rx.recv() => {
                    let Some(req) = maybe_req else { break };
                    if !req.pending.is_pending() {
                        self.take_pending(req.seq);
                        continue;
                    }
                    if self.extend_write_deadline(req.write_timeout).is_err() {
                        break;
                    }
                    let is_ping = req.header.is_ping();
                    let body_len = req.body.as_ref().map_or(0, |b| b.len());
                    let result = async {
                        encoder.encode_value(&req.header).await?;
                        if let Some(body) = &req.body {
                            encoder.encode_raw_frame(body).await?;
                        }
                        encoder.flush().await
                    }
                    .await;
                    if let Err(e) = result {
                        self.latch_net_error(e.into());
                        self.cancel.cancel();
                        break;
                    }
                    monitor.record_write(1);
                    if body_len > 0 {
                        monitor.record_write(body_len);
                    }
                    let _ = is_ping; // nothing further to do for pings
                }
            }
        }
    }

    /// Updates `last_use`/`call_count` after a delivered response and
    /// reports whether the pending table is now empty, mirroring
    /// `serveRead`'s post-delivery bookkeeping before `MarkAsIdle`.
    fn mark_settled_and_check_idle(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.net_error.is_some() {
            return false;
        }
        inner.last_use = Instant::now();
        inner.call_count += 1;
        inner.pending.is_empty()
    }

    fn latch_net_error(&self, err: RpcError) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.net_error.is_none() {
            inner.net_error = Some(err);
        }
    }

    fn on_reader_exit(&self) {
        self.exit_write.cancel();
        let drained = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if self.closed_by_deadline_gc.load(Ordering::Acquire) {
                inner.net_error = Some(well_known::deadline_gc_arrived());
            } else if inner.net_error.is_none() {
                inner.net_error = Some(well_known::wire_broken());
            }
            std::mem::take(&mut inner.pending)
        };
        *self.mailbox.lock().unwrap_or_else(|e| e.into_inner()) = None;
        for (_, entry) in drained {
            let _ = entry.tx.send(CallOutcome::Error(well_known::wire_broken()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    async fn spawn_pair() -> (Arc<ConnectionDriver>, Arc<ConnectionDriver>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (client, (server, _)) = tokio::join!(connect, async { listener.accept().await.unwrap() });
        let client = client.unwrap();
        let (client_r, client_w) = client.into_split();
        let (server_r, server_w) = server.into_split();

        let monitor = Arc::new(PoolMonitor::default());
        let exits = Arc::new(AtomicUsize::new(0));
        let exits2 = exits.clone();
        let hooks = PoolHooks {
            on_idle: Arc::new(|_id: u64| {}),
            on_exit: Arc::new(move |_id: u64| {
                exits2.fetch_add(1, Ordering::Relaxed);
            }),
        };

        let client_driver = ConnectionDriver::spawn(
            1,
            client_r,
            client_w,
            16,
            Duration::from_secs(5),
            Duration::from_secs(5),
            monitor.clone(),
            hooks.clone(),
        );
        let server_driver = ConnectionDriver::spawn(
            2,
            server_r,
            server_w,
            16,
            Duration::from_secs(5),
            Duration::from_secs(5),
            monitor,
            hooks,
        );
        (client_driver, server_driver)
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic_per_driver() {
        let (client, _server) = spawn_pair().await;
        let body = Bytes::from_static(b"null");
        let c1 = client
            .transfer_call("Svc", "M", CallType::Normal, body.clone(), Duration::from_secs(1))
            .unwrap();
        let c2 = client
            .transfer_call("Svc", "M", CallType::Normal, body, Duration::from_secs(1))
            .unwrap();
        assert!(c2.seq > c1.seq);
    }

    #[tokio::test]
    async fn extend_deadline_never_shrinks() {
        let (client, _server) = spawn_pair().await;
        client.extend_read_deadline(Duration::from_secs(10)).unwrap();
        let far = client.read_deadline();
        client.extend_read_deadline(Duration::from_secs(1)).unwrap();
        assert_eq!(client.read_deadline(), far);
    }

    #[tokio::test]
    async fn deadline_expired_rejects_further_extension() {
        let (client, _server) = spawn_pair().await;
        client.mark_deadline_expired();
        assert!(client.extend_read_deadline(Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn closing_drains_pending_calls_with_wire_broken() {
        let (client, _server) = spawn_pair().await;
        let body = Bytes::from_static(b"null");
        let call = client
            .transfer_call("Svc", "M", CallType::Normal, body, Duration::from_secs(1))
            .unwrap();
        client.close();
        let outcome = call.rx.await.expect("reader should deliver a drained outcome");
        match outcome {
            CallOutcome::Error(e) => assert_eq!(e.code, well_known::wire_broken().code),
            other => panic!("expected a drained error, got {other:?}"),
        }
    }
}
