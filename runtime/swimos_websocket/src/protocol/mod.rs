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

//! Static protocol tables: frame opcodes, close status codes and header flags.

pub mod frame;


use std::fmt::{Display, Formatter};
use thiserror::Error;

pub use frame::{apply_mask, Frame, FrameHeader};

bitflags::bitflags! {
    /// The flag bits of the first byte of a frame header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u8 {
        const FIN       = 0b1000_0000;

        // Reserved for extensions. None are ever negotiated.
        const RSV1      = 0b0100_0000;
        const RSV2      = 0b0010_0000;
        const RSV3      = 0b0001_0000;
        const RESERVED  = Self::RSV1.bits() | Self::RSV2.bits() | Self::RSV3.bits();
    }
}

impl HeaderFlags {
    pub fn is_fin(&self) -> bool {
        self.contains(HeaderFlags::FIN)
    }

    pub fn is_rsv1(&self) -> bool {
        self.contains(HeaderFlags::RSV1)
    }

    pub fn is_rsv2(&self) -> bool {
        self.contains(HeaderFlags::RSV2)
    }

    pub fn is_rsv3(&self) -> bool {
        self.contains(HeaderFlags::RSV3)
    }
}

/// The side of the connection an endpoint is acting as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

/// A WebSocket frame opcode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Whether this is the opcode of a control frame (Close, Ping or Pong).
    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Whether this is the opcode of a data frame (Continuation, Text or Binary).
    pub fn is_data(&self) -> bool {
        !self.is_control()
    }

    /// The symbolic name of the opcode.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Continuation => "Continuation",
            OpCode::Text => "Text",
            OpCode::Binary => "Binary",
            OpCode::Close => "Close",
            OpCode::Ping => "Ping",
            OpCode::Pong => "Pong",
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

/// A 4-bit value that is not one of the six defined opcodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("Unknown opcode: `{0:#x}`")]
pub struct OpCodeParseErr(pub u8);

impl TryFrom<u8> for OpCode {
    type Error = OpCodeParseErr;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            b => Err(OpCodeParseErr(b)),
        }
    }
}

/// Close status codes defined by RFC 6455 § 7.4.1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    ProtocolError = 1002,
    UnsupportedData = 1003,
    NoStatusReceived = 1005,
    AbnormalClosure = 1006,
    InvalidFramePayloadData = 1007,
    PolicyViolation = 1008,
    MessageTooBig = 1009,
    MandatoryExtension = 1010,
    InternalServerError = 1011,
}

impl CloseCode {
    /// The numeric status code.
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// The symbolic name of the status code.
    pub fn name(&self) -> &'static str {
        match self {
            CloseCode::Normal => "NormalClosure",
            CloseCode::GoingAway => "GoingAway",
            CloseCode::ProtocolError => "ProtocolError",
            CloseCode::UnsupportedData => "UnsupportedData",
            CloseCode::NoStatusReceived => "NoStatusReceived",
            CloseCode::AbnormalClosure => "AbnormalClosure",
            CloseCode::InvalidFramePayloadData => "InvalidFramePayloadData",
            CloseCode::PolicyViolation => "PolicyViolation",
            CloseCode::MessageTooBig => "MessageTooBig",
            CloseCode::MandatoryExtension => "MandatoryExtension",
            CloseCode::InternalServerError => "InternalServerError",
        }
    }
}

impl Display for CloseCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.code()
    }
}

/// A status code outside of the table of known close codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("Unknown close code: `{0}`")]
pub struct CloseCodeParseErr(pub u16);

impl TryFrom<u16> for CloseCode {
    type Error = CloseCodeParseErr;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(CloseCode::Normal),
            1001 => Ok(CloseCode::GoingAway),
            1002 => Ok(CloseCode::ProtocolError),
            1003 => Ok(CloseCode::UnsupportedData),
            1005 => Ok(CloseCode::NoStatusReceived),
            1006 => Ok(CloseCode::AbnormalClosure),
            1007 => Ok(CloseCode::InvalidFramePayloadData),
            1008 => Ok(CloseCode::PolicyViolation),
            1009 => Ok(CloseCode::MessageTooBig),
            1010 => Ok(CloseCode::MandatoryExtension),
            1011 => Ok(CloseCode::InternalServerError),
            c => Err(CloseCodeParseErr(c)),
        }
    }
}
