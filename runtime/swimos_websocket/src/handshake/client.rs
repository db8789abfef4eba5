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

use super::{
    compute_accept_key, token_list_contains, BufferedIo, MAX_HEADERS, MAX_HEAD_SIZE, UPGRADE_STR,
    WEBSOCKET_STR, WEBSOCKET_VERSION_STR,
};
use crate::errors::{ClientError, HttpError};
use bytes::{BufMut, BytesMut};
use http::header::{self, HeaderName};
use http::{StatusCode, Uri};
use httparse::{Response, Status};
use tokio::io::AsyncRead;

/// The challenge key sent by the client (the example nonce from rfc6455 § 1.3).
pub const CHALLENGE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Encodes an upgrade request for `uri` into `dst`.
pub fn encode_request(dst: &mut BytesMut, uri: &Uri, key: &str) -> Result<(), HttpError> {
    let authority = uri
        .authority()
        .ok_or_else(|| HttpError::MalformattedUri(uri.to_string()))?;
    let path = match uri.path_and_query() {
        Some(path) if !path.as_str().is_empty() => path.as_str(),
        _ => "/",
    };

    dst.put_slice(format!("GET {} HTTP/1.1\r\n", path).as_bytes());
    for (name, value) in [
        (header::HOST, authority.as_str()),
        (header::CONNECTION, UPGRADE_STR),
        (header::UPGRADE, WEBSOCKET_STR),
        (header::SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION_STR),
        (header::SEC_WEBSOCKET_KEY, key),
    ] {
        dst.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    dst.put_slice(b"\r\n");

    Ok(())
}

/// Reads the response to an upgrade request from `stream` and validates it against the challenge
/// key that was sent. Any bytes read past the end of the response head are left in `buf`.
pub async fn read_response<S>(stream: &mut S, buf: &mut BytesMut, key: &str) -> Result<(), ClientError>
where
    S: AsyncRead + Unpin,
{
    let mut buffered = BufferedIo::new(stream, buf);

    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = Response::new(&mut headers);

        match response.parse(buffered.buffer).map_err(HttpError::from)? {
            Status::Complete(count) => {
                check_response(&response, key)?;
                buffered.advance(count);
                break Ok(());
            }
            Status::Partial => {
                check_partial_response(&response)?;
                if buffered.buffer.len() >= MAX_HEAD_SIZE {
                    return Err(HttpError::HeadTooLarge(MAX_HEAD_SIZE).into());
                }
                if buffered.read().await? == 0 {
                    return Err(HttpError::UnexpectedEof.into());
                }
            }
        }
    }
}

fn check_partial_response(response: &Response) -> Result<(), HttpError> {
    match response.version {
        // httparse sets this to 0 for HTTP/1.0 or 1 for HTTP/1.1
        Some(1) | None => Ok(()),
        v => Err(HttpError::HttpVersion(v)),
    }
}

fn check_response(response: &Response, key: &str) -> Result<(), ClientError> {
    match response.version {
        Some(1) => {}
        v => return Err(HttpError::HttpVersion(v).into()),
    }

    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(HttpError::Malformed(httparse::Error::Status))?;
    if status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(ClientError::Upgrade(status));
    }

    validate_header(response.headers, header::UPGRADE, |value| {
        value.eq_ignore_ascii_case(WEBSOCKET_STR.as_bytes())
    })?;
    validate_header(response.headers, header::CONNECTION, |value| {
        token_list_contains(value, UPGRADE_STR)
    })?;

    let expected = compute_accept_key(key.as_bytes());
    match validate_header(response.headers, header::SEC_WEBSOCKET_ACCEPT, |value| {
        value == expected.as_bytes()
    }) {
        Err(HttpError::InvalidHeader(_)) => Err(HttpError::KeyMismatch.into()),
        result => Ok(result?),
    }
}

fn validate_header<F>(headers: &[httparse::Header], name: HeaderName, f: F) -> Result<(), HttpError>
where
    F: Fn(&[u8]) -> bool,
{
    match headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name.as_str()))
    {
        Some(header) if f(header.value) => Ok(()),
        Some(_) => Err(HttpError::InvalidHeader(name)),
        None => Err(HttpError::MissingHeader(name)),
    }
}
