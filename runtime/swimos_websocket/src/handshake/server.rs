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
    compute_accept_key, headers_contains, validate_challenge_key, BufferedIo, MAX_HEADERS,
    MAX_HEAD_SIZE, UPGRADE_STR, WEBSOCKET_STR, WEBSOCKET_VERSION_STR,
};
use crate::errors::{AcceptError, HandshakeRejected, HttpError, RejectReason};
use bytes::{BufMut, BytesMut};
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version};
use httparse::Status;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

const HTTP_VERSION: &[u8] = b"HTTP/1.1 ";
const FAILED_RESPONSE: &str = "Building response should not fail.";

/// Validates the headers of an upgrade request. The first failing check determines the
/// rejection. On success, returns the accept key for the response.
///
/// # Arguments
/// * `method` - The method of the request.
/// * `headers` - The headers of the request.
/// * `origin_check` - Decides whether the origin of the request is permitted.
pub fn validate_request<F>(
    method: &Method,
    headers: &HeaderMap,
    origin_check: F,
) -> Result<String, HandshakeRejected>
where
    F: FnOnce(&HeaderMap) -> bool,
{
    if !headers_contains(headers, header::CONNECTION, UPGRADE_STR) {
        return Err(RejectReason::NotUpgrade.into());
    }
    if method != Method::GET {
        return Err(RejectReason::Method.into());
    }
    match headers.get(header::UPGRADE) {
        Some(value) if value.as_bytes().eq_ignore_ascii_case(WEBSOCKET_STR.as_bytes()) => {}
        _ => return Err(RejectReason::UpgradeHeader.into()),
    }
    match headers.get(header::SEC_WEBSOCKET_VERSION) {
        Some(value) if value.as_bytes() == WEBSOCKET_VERSION_STR.as_bytes() => {}
        _ => return Err(RejectReason::Version.into()),
    }
    if !origin_check(headers) {
        return Err(RejectReason::Origin.into());
    }
    match headers.get(header::SEC_WEBSOCKET_KEY) {
        Some(key) if validate_challenge_key(key.as_bytes()) => {
            Ok(compute_accept_key(key.as_bytes()))
        }
        _ => Err(RejectReason::ChallengeKey.into()),
    }
}

/// Permits requests without an `Origin` header and requests whose origin has the same authority
/// as the `Host` header.
pub fn default_origin_check(headers: &HeaderMap) -> bool {
    let origin = match headers.get(header::ORIGIN) {
        Some(origin) => origin,
        None => return true,
    };
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let origin_authority = origin
        .to_str()
        .ok()
        .and_then(|o| o.parse::<Uri>().ok())
        .and_then(|uri| uri.authority().map(|a| a.as_str().to_string()));

    match (origin_authority, host) {
        (Some(origin), Some(host)) => origin.eq_ignore_ascii_case(host.trim()),
        _ => false,
    }
}

/// Builds the `101 Switching Protocols` response for an accepted upgrade.
pub fn build_response(accept_key: &str) -> Response<()> {
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, WEBSOCKET_STR)
        .header(header::CONNECTION, UPGRADE_STR)
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key)
        .body(())
        .expect(FAILED_RESPONSE)
}

impl HandshakeRejected {
    /// The status of the response to send for the rejection.
    pub fn status(&self) -> StatusCode {
        match self.reason {
            RejectReason::NotUpgrade | RejectReason::UpgradeHeader | RejectReason::ChallengeKey => {
                StatusCode::BAD_REQUEST
            }
            RejectReason::Method => StatusCode::METHOD_NOT_ALLOWED,
            RejectReason::Version => StatusCode::UPGRADE_REQUIRED,
            RejectReason::Origin => StatusCode::FORBIDDEN,
        }
    }

    /// Additional headers to send in the response for the rejection.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.reason == RejectReason::Version {
            headers.insert(
                header::SEC_WEBSOCKET_VERSION,
                HeaderValue::from_static(WEBSOCKET_VERSION_STR),
            );
        }
        headers
    }

    /// A response describing the rejection.
    pub fn into_response(self) -> Response<String> {
        let mut response = Response::new(self.to_string());
        *response.status_mut() = self.status();
        *response.headers_mut() = self.headers();
        response
    }
}

/// Reads an HTTP/1.1 request head from `stream`. Any bytes read past the end of the head are left
/// in `buf`.
pub async fn read_request<S>(stream: &mut S, buf: &mut BytesMut) -> Result<Request<()>, AcceptError>
where
    S: AsyncRead + Unpin,
{
    let mut buffered = BufferedIo::new(stream, buf);

    loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request.parse(buffered.buffer).map_err(HttpError::from)? {
            Status::Complete(count) => {
                let head = convert_request(&request)?;
                buffered.advance(count);
                break Ok(head);
            }
            Status::Partial => {
                check_partial_request(&request)?;
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

fn check_partial_request(request: &httparse::Request) -> Result<(), HttpError> {
    match request.version {
        Some(1) | None => Ok(()),
        v => Err(HttpError::HttpVersion(v)),
    }
}

fn convert_request(request: &httparse::Request) -> Result<Request<()>, HttpError> {
    match request.version {
        Some(1) => {}
        v => return Err(HttpError::HttpVersion(v)),
    }

    let method = request
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(HttpError::Malformed(httparse::Error::Token))?;
    let path = request.path.unwrap_or("/");
    let uri = path
        .parse::<Uri>()
        .map_err(|_| HttpError::MalformattedUri(path.to_string()))?;

    let mut head = Request::new(());
    *head.method_mut() = method;
    *head.uri_mut() = uri;
    *head.version_mut() = Version::HTTP_11;

    let headers = head.headers_mut();
    for h in request.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|_| HttpError::Malformed(httparse::Error::HeaderName))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|_| HttpError::Malformed(httparse::Error::HeaderValue))?;
        headers.append(name, value);
    }

    Ok(head)
}

/// Writes an HTTP/1.1 response head, followed by an optional body, to `stream`.
pub async fn write_response<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    status: StatusCode,
    headers: &HeaderMap,
    body: Option<&str>,
) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    buf.clear();

    buf.put_slice(HTTP_VERSION);
    buf.put_slice(status.as_str().as_bytes());
    if let Some(reason) = status.canonical_reason() {
        buf.put_u8(b' ');
        buf.put_slice(reason.as_bytes());
    }
    buf.put_slice(b"\r\n");

    for (name, value) in headers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }

    if let Some(body) = body {
        buf.put_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
        buf.put_slice(body.as_bytes());
    } else {
        buf.put_slice(b"\r\n");
    }

    let mut buffered = BufferedIo::new(stream, buf);
    buffered.write().await
}
