// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Retry-eligibility policy.
//!
//! A call is retried only when the error's `kind` bitfield carries
//! `CAN_RETRY` *and* its reason does not start with the codec's parse-error
//! prefix — a malformed frame means the bytes on the wire were wrong, and
//! dialing a fresh connection will produce the exact same bytes again.

use crate::error::{ErrorKind, PARSE_ERROR_PREFIX, RpcError};

/// Number of retry attempts a [`crate::client::Client::call`] makes after
/// the first, matching the reference implementation's single-retry policy.
pub const DEFAULT_RETRY_BUDGET: usize = 1;

pub fn can_retry(err: &RpcError) -> bool {
    err.kind.contains(ErrorKind::CAN_RETRY) && !err.reason.starts_with(PARSE_ERROR_PREFIX)
}
