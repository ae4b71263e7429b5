// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The default framing adapter: a 4-byte big-endian length prefix followed
//! by a `serde_json` encoding of the value.
//!
//! Grounded on the teacher's `ToBytes`/`FromBytes` pair in
//! `client/pdu_connection.rs` and the flush-per-frame discipline in
//! `client/client.rs`. `serde_json` is self-describing (field names travel
//! with the value), satisfying the wire contract's requirement without
//! introducing a codec crate the rest of the example pack never reaches
//! for.

use bytes::{Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CodecError;

/// Reads length-prefixed, `serde_json`-encoded frames from `R`.
pub struct FrameDecoder<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(inner: R) -> Self {
        FrameDecoder { inner }
    }

    /// Reads one frame's raw bytes without interpreting them. Used for the
    /// request body, whose concrete type is only known inside the method
    /// handler, and to discard an unroutable request's body.
    pub async fn read_raw_frame(&mut self) -> Result<Bytes, CodecError> {
        let len = self.inner.read_u32().await? as usize;
        let mut buf = BytesMut::zeroed(len);
        self.inner.read_exact(&mut buf).await?;
        Ok(buf.freeze())
    }

    pub async fn discard_frame(&mut self) -> Result<(), CodecError> {
        self.read_raw_frame().await.map(|_| ())
    }

    /// Reads and decodes one frame as `T`. Used for headers, whose type is
    /// known statically on both ends.
    pub async fn decode_value<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let bytes = self.read_raw_frame().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Writes length-prefixed, `serde_json`-encoded frames to `W`.
pub struct FrameEncoder<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameEncoder<W> {
    pub fn new(inner: W) -> Self {
        FrameEncoder { inner }
    }

    pub async fn encode_value<T: Serialize + Sync>(
        &mut self,
        value: &T,
    ) -> Result<usize, CodecError> {
        let bytes = serde_json::to_vec(value)?;
        self.encode_raw_frame(&bytes).await
    }

    pub async fn encode_raw_frame(&mut self, bytes: &[u8]) -> Result<usize, CodecError> {
        self.inner.write_u32(bytes.len() as u32).await?;
        self.inner.write_all(bytes).await?;
        Ok(bytes.len() + 4)
    }

    pub async fn flush(&mut self) -> Result<(), CodecError> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
