// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request/response header shapes and the ping convention.

use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Whether the caller expects a data reply (`Normal`) or only an ack
/// (`SendOnly`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    Normal,
    SendOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    pub service: String,
    pub method: String,
    pub seq: u64,
    pub call_type: CallType,
}

impl RequestHeader {
    /// The reserved service/method pair used for idle keepalive pings, kept
    /// identical to the reference implementation's `"go"."p"` convention so
    /// an interoperating peer recognizes it without translation.
    pub const PING_SERVICE: &'static str = "go";
    pub const PING_METHOD: &'static str = "p";

    pub fn ping(seq: u64) -> Self {
        RequestHeader {
            service: Self::PING_SERVICE.to_string(),
            method: Self::PING_METHOD.to_string(),
            seq,
            call_type: CallType::SendOnly,
        }
    }

    pub fn is_ping(&self) -> bool {
        self.service == Self::PING_SERVICE && self.method == Self::PING_METHOD
    }
}

bitflags::bitflags! {
    /// A response can carry data, be a pong, or be a bare ack — these are
    /// not mutually exclusive in principle (a pong is just a reserved-method
    /// ack with no body), so this is a bitfield rather than an enum, mirroring
    /// the reference implementation's `ReplyType`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ReplyType: u16 {
        const DATA = 0x01;
        const PONG = 0x10;
        const ACK  = 0x100;
    }
}

impl ReplyType {
    pub fn have_reply(&self) -> bool {
        self.contains(ReplyType::DATA)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub seq: u64,
    pub reply_type: ReplyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<RpcError>,
}

impl ResponseHeader {
    pub fn pong(seq: u64) -> Self {
        ResponseHeader {
            seq,
            reply_type: ReplyType::PONG,
            err: None,
        }
    }

    pub fn ack(seq: u64) -> Self {
        ResponseHeader {
            seq,
            reply_type: ReplyType::ACK,
            err: None,
        }
    }

    pub fn ack_error(seq: u64, err: RpcError) -> Self {
        ResponseHeader {
            seq,
            reply_type: ReplyType::ACK,
            err: Some(err),
        }
    }

    pub fn data(seq: u64) -> Self {
        ResponseHeader {
            seq,
            reply_type: ReplyType::DATA,
            err: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_header_round_trips_through_json() {
        let header = RequestHeader::ping(7);
        let bytes = serde_json::to_vec(&header).unwrap();
        let back: RequestHeader = serde_json::from_slice(&bytes).unwrap();
        assert!(back.is_ping());
        assert_eq!(back.seq, 7);
    }

    #[test]
    fn data_reply_type_reports_have_reply() {
        assert!(ReplyType::DATA.have_reply());
        assert!(!ReplyType::ACK.have_reply());
        assert!(!ReplyType::PONG.have_reply());
    }
}
