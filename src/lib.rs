// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A pipelined, multiplexed RPC runtime.
//!
//! The core of this crate is the client-side connection lifecycle: a
//! bounded pool of long-lived duplex connections ([`runtime::pool`]) over
//! which many concurrent calls are multiplexed by sequence number
//! ([`runtime::driver`]), kept alive by idle pings, garbage-collected by
//! deadlines, and drained safely when the wire breaks. The server mirrors
//! the same framing on the accept side ([`server`]) and dispatches to a
//! compile-time method registry ([`server::registry`]).

/// Configuration, command-line path resolution, and logging.
pub mod cfg;
/// Client façade: per-endpoint connection pools and `Call` orchestration.
pub mod client;
/// Error taxonomy shared by client and server.
pub mod error;
/// Read-only atomic counters for pools and servers.
pub mod monitor;
/// Retry-eligibility policy tied to error classification.
pub mod retry;
/// Connection driver, pool, and the idle-ping/deadline-GC loops.
pub mod runtime;
/// Accept loop, method registry, and per-connection dispatcher.
pub mod server;
/// Coarse timer wheel used for per-call deadlines.
pub mod timer_wheel;
/// Connection id generation and small standalone helpers.
pub mod utils;
/// Wire framing: request/response headers and the default codec adapter.
pub mod wire;
