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

use crate::errors::ReadError;
use crate::protocol::{CloseCode, HeaderFlags, OpCode};
use bytes::{BufMut, BytesMut};
use either::Either;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::mem::size_of;

const U16_MAX: usize = u16::MAX as usize;

/// The largest payload that may be embedded directly in the base length field.
pub const MAX_BASE_LEN: usize = 125;
/// The largest payload permitted in a control frame.
pub const CONTROL_MAX_SIZE: usize = 125;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: OpCode,
    pub flags: HeaderFlags,
    pub mask: Option<u32>,
}

impl Default for FrameHeader {
    fn default() -> Self {
        FrameHeader {
            opcode: OpCode::Continuation,
            flags: HeaderFlags::empty(),
            mask: None,
        }
    }
}

macro_rules! try_parse_int {
    ($source:ident, $offset:ident, $source_length:ident, $into:ty) => {{
        const WIDTH: usize = size_of::<$into>();
        if $source_length < WIDTH + $offset {
            return Ok(Either::Right($offset + WIDTH - $source_length));
        }

        match <[u8; WIDTH]>::try_from(&$source[$offset..$offset + WIDTH]) {
            Ok(len) => {
                let len = <$into>::from_be_bytes(len);
                $offset += WIDTH;
                len
            }
            Err(_) => return Ok(Either::Right($offset + WIDTH - $source_length)),
        }
    }};
}

impl FrameHeader {
    pub fn new(opcode: OpCode, flags: HeaderFlags, mask: Option<u32>) -> FrameHeader {
        FrameHeader {
            opcode,
            flags,
            mask,
        }
    }

    /// Writes the header for a payload of `payload_len` bytes into `dst`.
    pub fn write_into(&self, dst: &mut BytesMut, payload_len: usize) {
        let FrameHeader {
            opcode,
            flags,
            mask,
        } = self;
        let (second, mut offset) = if mask.is_some() {
            (0x80, 6)
        } else {
            (0x0, 2)
        };

        if payload_len > U16_MAX {
            offset += 8;
        } else if payload_len > MAX_BASE_LEN {
            offset += 2;
        }

        dst.reserve(offset + payload_len);
        let first = flags.bits() | u8::from(*opcode);

        if payload_len > U16_MAX {
            dst.extend_from_slice(&[first, second | 127]);
            dst.put_u64(payload_len as u64);
        } else if payload_len > MAX_BASE_LEN {
            dst.extend_from_slice(&[first, second | 126]);
            dst.put_u16(payload_len as u16);
        } else {
            dst.extend_from_slice(&[first, second | payload_len as u8]);
        }

        if let Some(mask) = mask {
            dst.put_u32(*mask);
        }
    }

    /// Attempts to parse a frame header from the start of `source`.
    ///
    /// Returns the header, the length of the header and the length of the payload that follows
    /// it or, if `source` does not yet hold a complete header, the minimum number of additional
    /// bytes that are required.
    pub fn read_from(
        source: &[u8],
        max_size: usize,
    ) -> Result<Either<(FrameHeader, usize, usize), usize>, ReadError> {
        let source_length = source.len();
        if source_length < 2 {
            return Ok(Either::Right(2 - source_length));
        }

        let first = source[0];
        let flags = HeaderFlags::from_bits_truncate(first);
        let opcode = OpCode::try_from(first & 0xF)?;

        let second = source[1];
        let masked = second & 0x80 != 0;
        let payload_length = second & 0x7F;
        let mut offset = 2;

        let length: u64 = if payload_length == 126 {
            u64::from(try_parse_int!(source, offset, source_length, u16))
        } else if payload_length == 127 {
            try_parse_int!(source, offset, source_length, u64)
        } else {
            u64::from(payload_length)
        };

        if length > max_size as u64 {
            return Err(ReadError::Overflow {
                len: length,
                max: max_size,
            });
        }

        let mask = if masked {
            Some(try_parse_int!(source, offset, source_length, u32))
        } else {
            None
        };

        Ok(Either::Left((
            FrameHeader {
                opcode,
                flags,
                mask,
            },
            offset,
            length as usize,
        )))
    }
}

/// XORs `bytes` with the 4 byte mask key, cycling over the key. Applying the same mask twice
/// restores the original bytes.
pub fn apply_mask(mask: u32, bytes: &mut [u8]) {
    let mask: [u8; 4] = mask.to_be_bytes();

    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte ^= mask[i & 0x3]
    }
}

/// A single WebSocket frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: BytesMut,
}

impl Frame {
    /// A final frame with the provided opcode and payload.
    pub fn new(opcode: OpCode, payload: &[u8]) -> Frame {
        Frame {
            header: FrameHeader::new(opcode, HeaderFlags::FIN, None),
            payload: BytesMut::from(payload),
        }
    }

    pub fn text(payload: &[u8]) -> Frame {
        Frame::new(OpCode::Text, payload)
    }

    pub fn binary(payload: &[u8]) -> Frame {
        Frame::new(OpCode::Binary, payload)
    }

    pub fn ping(payload: &[u8]) -> Frame {
        Frame::new(OpCode::Ping, payload)
    }

    pub fn pong(payload: &[u8]) -> Frame {
        Frame::new(OpCode::Pong, payload)
    }

    /// A close frame carrying `code` as its 2 byte payload.
    pub fn close(code: u16) -> Frame {
        Frame::new(OpCode::Close, &code.to_be_bytes())
    }

    /// Overwrites this frame in place, reusing the payload's allocation.
    pub fn set(&mut self, opcode: OpCode, payload: &[u8]) {
        self.header = FrameHeader::new(opcode, HeaderFlags::FIN, None);
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }

    /// Overwrites this frame in place with a close frame carrying `code`.
    pub fn set_close(&mut self, code: u16) {
        self.set(OpCode::Close, &code.to_be_bytes());
    }

    /// Clears every field of the frame. The payload's allocation is retained.
    pub fn reset(&mut self) {
        self.header = FrameHeader::default();
        self.payload.clear();
    }

    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_fin(&self) -> bool {
        self.header.flags.is_fin()
    }

    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    pub fn is_control(&self) -> bool {
        self.header.opcode.is_control()
    }

    pub fn is_close(&self) -> bool {
        self.header.opcode == OpCode::Close
    }

    pub fn is_ping(&self) -> bool {
        self.header.opcode == OpCode::Ping
    }

    pub fn is_pong(&self) -> bool {
        self.header.opcode == OpCode::Pong
    }

    pub fn is_continuation(&self) -> bool {
        self.header.opcode == OpCode::Continuation
    }

    /// The status code carried by a close frame, if it has one.
    pub fn close_code(&self) -> Option<u16> {
        match self.payload.as_ref() {
            [hi, lo, ..] if self.is_close() => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Encodes the frame into `dst`. If the header carries a mask key, the payload is written
    /// masked; the frame itself is left untouched.
    pub fn write_into(&self, dst: &mut BytesMut) {
        let Frame { header, payload } = self;
        header.write_into(dst, payload.len());

        let start = dst.len();
        dst.extend_from_slice(payload);
        if let Some(mask) = header.mask {
            apply_mask(mask, &mut dst[start..]);
        }
    }
}

impl From<CloseCode> for Frame {
    fn from(code: CloseCode) -> Self {
        Frame::close(code.code())
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let Frame { header, payload } = self;
        let FrameHeader {
            opcode,
            flags,
            mask,
        } = header;
        write!(
            f,
            "opcode: {}, fin: {}, rsv: [{}, {}, {}], masked: {}, len: {}",
            opcode,
            flags.is_fin(),
            flags.is_rsv1(),
            flags.is_rsv2(),
            flags.is_rsv3(),
            mask.is_some(),
            payload.len()
        )
    }
}
