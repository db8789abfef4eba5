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

use crate::protocol::OpCodeParseErr;
use http::header::HeaderName;
use http::StatusCode;
use std::io;
use thiserror::Error;

/// Errors produced while decoding a frame from a stream.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The stream ended part way through a frame. `bytes_read` is the number of bytes of the
    /// incomplete frame that were consumed; zero indicates that the stream ended cleanly between
    /// two frames.
    #[error("The stream ended after {bytes_read} bytes of an incomplete frame")]
    Truncated { bytes_read: usize },
    /// Reading from the underlying transport failed.
    #[error("Reading from the transport failed: {0}")]
    Io(#[from] io::Error),
    /// The frame header contained an opcode that is not defined by the protocol.
    #[error("Received an invalid frame: {0}")]
    InvalidOpCode(#[from] OpCodeParseErr),
    /// The frame header declared a payload larger than the configured maximum.
    #[error("A frame of {len} bytes exceeded the maximum permitted size of {max} bytes")]
    Overflow { len: u64, max: usize },
}

impl ReadError {
    /// Whether the stream was closed by the peer between two frames.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, ReadError::Truncated { bytes_read: 0 })
    }
}

/// Writing a frame to the transport failed. `written` is the number of bytes of the encoded
/// frame that were accepted by the transport before the failure.
#[derive(Debug, Error)]
#[error("Writing to the transport failed after {written} bytes: {source}")]
pub struct WriteError {
    pub written: usize,
    #[source]
    pub source: io::Error,
}

/// Violations of the framing rules, detected on inbound frames by the connection engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// rfc6455 § 5.4: Control frames themselves MUST NOT be fragmented.
    #[error("Received a fragmented control frame")]
    FragmentedControl,
    /// rfc6455 § 5.5: All control frames MUST have a payload length of 125 bytes or less.
    #[error("Received a control frame with a payload of {0} bytes")]
    ControlTooLarge(usize),
    /// A reserved bit was set but no extension has been negotiated.
    #[error("Received a frame with a reserved bit set")]
    ReservedBits,
    /// rfc6455 § 6.1: Client must send masked data.
    #[error("Received an unexpected unmasked frame")]
    UnmaskedFrame,
    /// rfc6455 § 6.2: Server must not mask data.
    #[error("Received an unexpected masked frame")]
    MaskedFrame,
}

/// The connection has started closing (or has closed) and no longer accepts frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("The connection is closed")]
pub struct ConnectionClosed;

/// Errors produced when enqueueing a frame on a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum SendError {
    #[error(transparent)]
    Closed(#[from] ConnectionClosed),
    /// A control frame payload was larger than 125 bytes.
    #[error("A control frame payload of {0} bytes exceeds 125 bytes")]
    ControlTooLarge(usize),
}

/// The reason that an upgrade request was refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("The Connection header must request an upgrade")]
    NotUpgrade,
    #[error("The request method must be GET")]
    Method,
    #[error("The Upgrade header must be `websocket`")]
    UpgradeHeader,
    #[error("The Sec-WebSocket-Version header must be `13`")]
    Version,
    #[error("The request origin is not permitted")]
    Origin,
    #[error("The Sec-WebSocket-Key header must be the base64 encoding of 16 bytes")]
    ChallengeKey,
}

/// An upgrade request failed validation. The connection is never upgraded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("WebSocket upgrade rejected: {reason}")]
pub struct HandshakeRejected {
    pub reason: RejectReason,
}

impl From<RejectReason> for HandshakeRejected {
    fn from(reason: RejectReason) -> Self {
        HandshakeRejected { reason }
    }
}

/// Errors in the HTTP exchange of the opening handshake.
#[derive(Debug, Error, PartialEq)]
pub enum HttpError {
    /// The request or response head could not be parsed.
    #[error("Malformed HTTP message: {0}")]
    Malformed(#[from] httparse::Error),
    /// The request or response head exceeded the size limit.
    #[error("The HTTP head exceeded {0} bytes")]
    HeadTooLarge(usize),
    /// An HTTP version other than 1.1 was used.
    #[error("Invalid HTTP version: `{0:?}`")]
    HttpVersion(Option<u8>),
    /// A response was missing an expected header.
    #[error("Missing header: `{0}`")]
    MissingHeader(HeaderName),
    /// A response contained an invalid header.
    #[error("Invalid header: `{0}`")]
    InvalidHeader(HeaderName),
    /// The Sec-WebSocket-Accept header did not match the challenge key.
    #[error("Sec-WebSocket-Accept mismatch")]
    KeyMismatch,
    /// The provided URI was malformatted.
    #[error("The provided URI was malformatted: {0}")]
    MalformattedUri(String),
    /// The peer closed the connection before the handshake completed.
    #[error("The connection closed during the handshake")]
    UnexpectedEof,
}

/// Errors produced by the server when accepting a connection from a raw socket.
#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("Accepting the connection failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Rejected(#[from] HandshakeRejected),
}

/// Errors produced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The URL could not be used to open a connection.
    #[error("Bad WebSocket URL: {0}")]
    Url(String),
    #[error("Connection failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
    /// The server answered the upgrade request with a status other than 101.
    #[error("The server refused to upgrade the connection: {0}")]
    Upgrade(StatusCode),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Write(#[from] WriteError),
}
