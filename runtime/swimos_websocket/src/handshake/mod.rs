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

//! The opening handshake: computation of the accept key and the HTTP/1.1 exchange that upgrades
//! a connection.

mod client;
mod server;


pub use client::{encode_request, read_response, CHALLENGE_KEY};
pub use server::{
    build_response, default_origin_check, read_request, validate_request, write_response,
};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Buf, BytesMut};
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue};
use sha1::{Digest, Sha1};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The GUID appended to the challenge key when computing the accept key (rfc6455 § 1.3).
pub const ACCEPT_KEY: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) const UPGRADE_STR: &str = "Upgrade";
pub(crate) const WEBSOCKET_STR: &str = "websocket";
pub(crate) const WEBSOCKET_VERSION_STR: &str = "13";

const MAX_HEAD_SIZE: usize = 8 * 1024;
const MAX_HEADERS: usize = 32;
const RESIZE: usize = 1024;

/// Computes the value of the `Sec-WebSocket-Accept` header for a challenge key.
///
/// # Arguments
/// * `challenge_key` - The value of the `Sec-WebSocket-Key` header, exactly as it was sent.
pub fn compute_accept_key(challenge_key: &[u8]) -> String {
    let mut digest = Sha1::new();
    Digest::update(&mut digest, challenge_key);
    Digest::update(&mut digest, ACCEPT_KEY);
    STANDARD.encode(digest.finalize())
}

/// Whether a challenge key is the base64 encoding of exactly 16 bytes.
pub fn validate_challenge_key(key: &[u8]) -> bool {
    !key.is_empty() && matches!(STANDARD.decode(key), Ok(bytes) if bytes.len() == 16)
}

/// Whether any value of the header `name` contains `value` as a token, ignoring case.
pub fn headers_contains(headers: &HeaderMap, name: HeaderName, value: &str) -> bool {
    headers.get_all(name).iter().any(header_contains(value))
}

pub(crate) fn header_contains(content: &str) -> impl Fn(&HeaderValue) -> bool + '_ {
    move |header| token_list_contains(header.as_bytes(), content)
}

/// Whether a comma separated header value contains `token`, ignoring case.
pub(crate) fn token_list_contains(value: &[u8], token: &str) -> bool {
    value
        .split(|&c| c == b' ' || c == b',')
        .map(|s| std::str::from_utf8(s).unwrap_or("").trim())
        .any(|s| s.eq_ignore_ascii_case(token))
}

/// A stream paired with the buffer used to read or write an HTTP head.
struct BufferedIo<'s, S> {
    socket: &'s mut S,
    buffer: &'s mut BytesMut,
}

impl<'s, S> BufferedIo<'s, S> {
    fn new(socket: &'s mut S, buffer: &'s mut BytesMut) -> BufferedIo<'s, S> {
        BufferedIo { socket, buffer }
    }

    async fn write(&mut self) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let BufferedIo { socket, buffer } = self;

        socket.write_all(buffer).await?;
        socket.flush().await
    }

    /// Reads more bytes into the buffer, returning the number that were read.
    async fn read(&mut self) -> io::Result<usize>
    where
        S: AsyncRead + Unpin,
    {
        let BufferedIo { socket, buffer } = self;

        buffer.reserve(RESIZE);
        socket.read_buf(&mut **buffer).await
    }

    fn advance(&mut self, count: usize) {
        self.buffer.advance(count);
    }
}
