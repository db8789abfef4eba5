// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[cfg(test)]
mod tests;

use crate::errors::{ReadError, WriteError};
use crate::protocol::{apply_mask, Frame, FrameHeader};
use bytes::{Buf, BytesMut};
use either::Either;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

const MIN_READ: usize = 4 * 1024;

/// The outcome of attempting to decode a frame from a buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A whole frame was decoded and removed from the buffer.
    Complete,
    /// The buffer does not yet hold a whole frame; at least `needed` more bytes are required.
    Incomplete { needed: usize },
}

/// Encoder and decoder for single WebSocket frames.
///
/// The codec handles the wire layout only: it does not enforce rules that depend on the opcode,
/// the reserved bits or the role of the endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec {
            max_payload_size: usize::MAX,
        }
    }
}

impl FrameCodec {
    /// # Arguments
    /// * `max_payload_size` - Frames declaring a larger payload are rejected before any of the
    ///   payload is buffered.
    pub fn new(max_payload_size: usize) -> FrameCodec {
        FrameCodec { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) {
        frame.write_into(dst);
    }

    /// Attempts to decode a frame from the front of `src` into `frame`. The frame is only
    /// modified if a whole frame is available. A masked payload is unmasked; the mask key is
    /// kept in the header.
    pub fn decode_into(
        &self,
        src: &mut BytesMut,
        frame: &mut Frame,
    ) -> Result<DecodeStatus, ReadError> {
        let (header, header_len, payload_len) =
            match FrameHeader::read_from(src, self.max_payload_size)? {
                Either::Left(parts) => parts,
                Either::Right(needed) => return Ok(DecodeStatus::Incomplete { needed }),
            };

        let frame_len = header_len
            .checked_add(payload_len)
            .ok_or(ReadError::Overflow {
                len: payload_len as u64,
                max: self.max_payload_size,
            })?;
        if src.len() < frame_len {
            return Ok(DecodeStatus::Incomplete {
                needed: frame_len - src.len(),
            });
        }

        src.advance(header_len);

        let Frame {
            header: frame_header,
            payload,
        } = frame;
        *frame_header = header;
        payload.clear();
        payload.extend_from_slice(&src[..payload_len]);
        src.advance(payload_len);

        if let Some(mask) = header.mask {
            apply_mask(mask, payload);
        }

        Ok(DecodeStatus::Complete)
    }

    /// Reads exactly one frame from `io` into `frame`, using `buffer` to hold bytes that have
    /// been read but not yet consumed. Bytes following the frame remain in `buffer`.
    pub async fn read_frame<R>(
        &self,
        io: &mut R,
        buffer: &mut BytesMut,
        frame: &mut Frame,
    ) -> Result<(), ReadError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match self.decode_into(buffer, frame)? {
                DecodeStatus::Complete => break Ok(()),
                DecodeStatus::Incomplete { needed } => {
                    buffer.reserve(needed.max(MIN_READ));
                    if io.read_buf(buffer).await? == 0 {
                        break Err(ReadError::Truncated {
                            bytes_read: buffer.len(),
                        });
                    }
                }
            }
        }
    }

    /// Encodes `frame` into `buffer`, writes it to `io` and flushes. Returns the number of bytes
    /// written. Partial writes are not retried.
    pub async fn write_frame<W>(
        &self,
        io: &mut W,
        buffer: &mut BytesMut,
        frame: &Frame,
    ) -> Result<usize, WriteError>
    where
        W: AsyncWrite + Unpin,
    {
        buffer.clear();
        self.encode(frame, buffer);

        let mut written = 0;
        while written < buffer.len() {
            match io.write(&buffer[written..]).await {
                Ok(0) => {
                    return Err(WriteError {
                        written,
                        source: io::ErrorKind::WriteZero.into(),
                    })
                }
                Ok(n) => written += n,
                Err(source) => return Err(WriteError { written, source }),
            }
        }
        io.flush()
            .await
            .map_err(|source| WriteError { written, source })?;

        buffer.clear();
        Ok(written)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ReadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut frame = Frame::default();
        match self.decode_into(src, &mut frame)? {
            DecodeStatus::Complete => Ok(Some(frame)),
            DecodeStatus::Incomplete { needed } => {
                src.reserve(needed);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ReadError::Truncated {
                bytes_read: src.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_into(dst);
        Ok(())
    }
}
