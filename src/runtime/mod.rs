// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The client-side connection lifecycle: a single multiplexed
//! [`driver::ConnectionDriver`] and the [`pool::ConnectionPool`] that
//! bounds, rotates, idle-pings, and deadline-GCs a set of them.

pub mod driver;
pub mod pool;

pub use driver::{ConnectionDriver, PoolHooks};
pub use pool::ConnectionPool;
