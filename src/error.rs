// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The error taxonomy shared by the client and the server.
//!
//! An [`RpcError`] travels over the wire inside a response's ack/error
//! frame exactly as any other value, so it is plain `serde`-serialisable
//! rather than relying on `std::error::Error` downcasting. [`ErrorKind`] is
//! a bitfield (not a closed enum) because a single failure is frequently
//! more than one thing at once: a timeout is both `net` and, depending on
//! policy, retryable.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    /// Bit meanings mirror the reference implementation this runtime was
    /// distilled from: `critical` aborts the connection, `logic` is a
    /// well-formed application-level failure, `canRetry` gates the client's
    /// retry policy (see [`crate::retry::can_retry`]), and `net` marks a
    /// transport-level fault.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ErrorKind: u8 {
        const CRITICAL  = 0b0001;
        const LOGIC     = 0b0010;
        const CAN_RETRY = 0b0100;
        const NET       = 0b1000;
    }
}

/// Prefix the codec attaches to a decode failure's reason string. Retry
/// policy refuses to retry a parse error even if its kind carries
/// `CAN_RETRY`, because retrying will not make malformed bytes well-formed.
pub const PARSE_ERROR_PREFIX: &str = "parse: ";

/// An RPC-level error: a stable numeric `code` for programmatic handling,
/// a bitfield `kind`, and a human-readable `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("rpc error {code} ({kind:?}): {reason}")]
pub struct RpcError {
    pub code: i32,
    pub kind: ErrorKind,
    pub reason: String,
}

impl RpcError {
    pub fn new(code: i32, kind: ErrorKind, reason: impl Into<String>) -> Self {
        RpcError {
            code,
            kind,
            reason: reason.into(),
        }
    }

    /// Returns a copy with the reason replaced, keeping code and kind.
    /// Mirrors the reference implementation's `SetReason`, which likewise
    /// returns a fresh value rather than mutating a shared one.
    pub fn with_reason(&self, reason: impl Into<String>) -> Self {
        RpcError {
            reason: reason.into(),
            ..self.clone()
        }
    }
}

/// Errors raised by the codec layer while decoding a frame. Kept distinct
/// from [`RpcError`] so that I/O failures (fatal to the connection) can
/// never be confused with a malformed-payload failure (fatal to the call,
/// not the connection) before they are classified.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(io) => well_known::wire_broken().with_reason(io.to_string()),
            CodecError::Decode(e) => well_known::codec_error()
                .with_reason(format!("{PARSE_ERROR_PREFIX}{e}")),
        }
    }
}

/// Well-known error values, grounded on `error.go`'s package-level `*Error`
/// variables. Each call returns a fresh value (never a shared static) since
/// `RpcError` carries an owned `reason` that call sites routinely replace.
pub mod well_known {
    use super::{ErrorKind, PARSE_ERROR_PREFIX, RpcError};

    pub fn request_timeout() -> RpcError {
        RpcError::new(100, ErrorKind::LOGIC, "client request time out")
    }

    pub fn no_idle_conn() -> RpcError {
        RpcError::new(
            101,
            ErrorKind::LOGIC.union(ErrorKind::CAN_RETRY),
            "no idle connection available",
        )
    }

    pub fn no_working_conn() -> RpcError {
        RpcError::new(
            102,
            ErrorKind::LOGIC.union(ErrorKind::CAN_RETRY),
            "no working connection to share",
        )
    }

    pub fn connect_timeout() -> RpcError {
        RpcError::new(
            103,
            ErrorKind::NET.union(ErrorKind::CAN_RETRY),
            "dial timed out",
        )
    }

    pub fn deadline_gc_arrived() -> RpcError {
        RpcError::new(
            104,
            ErrorKind::CRITICAL.union(ErrorKind::NET),
            "connection reclaimed by deadline GC",
        )
    }

    pub fn no_endpoints() -> RpcError {
        RpcError::new(105, ErrorKind::LOGIC, "no endpoints registered")
    }

    pub fn codec_error() -> RpcError {
        RpcError::new(
            106,
            ErrorKind::CRITICAL.union(ErrorKind::CAN_RETRY),
            format!("{PARSE_ERROR_PREFIX}failed to decode frame"),
        )
    }

    /// Reserved for a failure that does not fit any of the other named
    /// kinds. Nothing in this crate's own code paths produces it today —
    /// every RpcError either originates from a well-known condition here or
    /// is the application's own typed error round-tripped verbatim — but it
    /// is kept so a caller-supplied `code` of 107 decodes to something with
    /// the right kind bits rather than being rejected.
    pub fn unknown() -> RpcError {
        RpcError::new(107, ErrorKind::LOGIC, "unknown error")
    }

    pub fn invalid_address() -> RpcError {
        RpcError::new(108, ErrorKind::LOGIC, "invalid endpoint address")
    }

    pub fn connect_fail() -> RpcError {
        RpcError::new(109, ErrorKind::NET, "failed to connect")
    }

    pub fn wire_broken() -> RpcError {
        RpcError::new(
            111,
            ErrorKind::CRITICAL
                .union(ErrorKind::NET)
                .union(ErrorKind::CAN_RETRY),
            "connection closed unexpectedly",
        )
    }

    pub fn pending_mailbox_full() -> RpcError {
        RpcError::new(
            121,
            ErrorKind::LOGIC.union(ErrorKind::CAN_RETRY),
            "too many pending requests on this connection",
        )
    }

    pub fn invalid_request() -> RpcError {
        RpcError::new(
            400,
            ErrorKind::CRITICAL,
            "invalid service or method",
        )
    }

    pub fn internal(reason: impl Into<String>) -> RpcError {
        RpcError::new(500, ErrorKind::LOGIC, reason)
    }
}
