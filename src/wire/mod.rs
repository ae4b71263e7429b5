// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire framing: request/response headers and the default codec adapter.

/// `RequestHeader`, `ResponseHeader`, `CallType`, and `ReplyType`.
pub mod frame;
/// Length-prefixed `serde_json` encoder/decoder pair.
pub mod codec;

pub use codec::{FrameDecoder, FrameEncoder};
pub use frame::{CallType, ReplyType, RequestHeader, ResponseHeader};
