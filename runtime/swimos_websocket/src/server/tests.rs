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

use crate::codec::FrameCodec;
use crate::connection::Connection;
use crate::errors::{AcceptError, RejectReason};
use crate::handshake::{encode_request, read_response, CHALLENGE_KEY};
use crate::protocol::{Frame, OpCode};
use crate::server::{FrameHandler, Server};
use bytes::BytesMut;
use futures::future::{ready, BoxFuture};
use futures::FutureExt;
use http::header::{self, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Message(bool, Vec<u8>),
    Pong(Vec<u8>),
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl FrameHandler for Recorder {
    fn on_message<'a>(
        &'a self,
        _connection: &'a Connection,
        is_binary: bool,
        payload: &'a [u8],
    ) -> BoxFuture<'a, ()> {
        self.events
            .lock()
            .push(Event::Message(is_binary, payload.to_vec()));
        ready(()).boxed()
    }

    fn on_pong<'a>(&'a self, _connection: &'a Connection, payload: &'a [u8]) -> BoxFuture<'a, ()> {
        self.events.lock().push(Event::Pong(payload.to_vec()));
        ready(()).boxed()
    }
}

fn upgrade_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::HOST, HeaderValue::from_static("localhost"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    headers.insert(header::SEC_WEBSOCKET_KEY, HeaderValue::from_static(CHALLENGE_KEY));
    headers
}

async fn send(stream: &mut DuplexStream, mut frame: Frame) {
    frame.header.mask = Some(0xCAFEBABE);
    FrameCodec::default()
        .write_frame(stream, &mut BytesMut::new(), &frame)
        .await
        .expect("Write failed.");
}

async fn receive(stream: &mut DuplexStream, buffer: &mut BytesMut) -> Frame {
    let mut frame = Frame::default();
    timeout(
        TEST_TIMEOUT,
        FrameCodec::default().read_frame(stream, buffer, &mut frame),
    )
    .await
    .expect("Timed out.")
    .expect("Read failed.");
    frame
}

#[test]
fn negotiate() {
    let server = Server::new(Recorder::default());

    let response = server
        .negotiate(&Method::GET, &upgrade_headers())
        .expect("Upgrade rejected.");
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(
        response.headers().get(header::SEC_WEBSOCKET_ACCEPT).unwrap(),
        "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );

    let mut headers = upgrade_headers();
    headers.remove(header::CONNECTION);
    let rejected = server
        .negotiate(&Method::GET, &headers)
        .expect_err("Upgrade accepted.");
    assert_eq!(rejected.reason, RejectReason::NotUpgrade);
    assert!(rejected.status().is_client_error());
}

#[test]
fn custom_origin_check() {
    let server = Server::new(Recorder::default()).with_origin_check(|headers| {
        headers
            .get(header::ORIGIN)
            .map(|origin| origin == "https://swimos.org")
            .unwrap_or(false)
    });

    let rejected = server
        .negotiate(&Method::GET, &upgrade_headers())
        .expect_err("Upgrade accepted.");
    assert_eq!(rejected.reason, RejectReason::Origin);
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);

    let mut headers = upgrade_headers();
    headers.insert(header::ORIGIN, HeaderValue::from_static("https://swimos.org"));
    assert!(server.clone().negotiate(&Method::GET, &headers).is_ok());
}

#[tokio::test]
async fn dispatch_frames() {
    let recorder = Recorder::default();
    let server = Server::new(recorder.clone());
    let (local, mut remote) = duplex(4096);

    let peer = async move {
        let mut buffer = BytesMut::new();

        send(&mut remote, Frame::text(b"hello world")).await;
        send(&mut remote, Frame::binary(&[1, 2, 3])).await;
        send(&mut remote, Frame::new(OpCode::Continuation, b"more")).await;
        send(&mut remote, Frame::pong(b"unsolicited")).await;
        send(&mut remote, Frame::ping(b"are you there?")).await;

        let pong = receive(&mut remote, &mut buffer).await;
        assert!(pong.is_pong());
        assert!(!pong.is_masked());
        assert_eq!(pong.payload.as_ref(), b"are you there?");

        send(&mut remote, Frame::close(1001)).await;
        let close = receive(&mut remote, &mut buffer).await;
        assert_eq!(close.close_code(), Some(1001));

        let mut rest = vec![];
        remote
            .read_to_end(&mut rest)
            .await
            .expect("Read failed.");
        assert!(rest.is_empty());
    };

    let serve = async {
        timeout(TEST_TIMEOUT, server.serve(local, BytesMut::new()))
            .await
            .expect("Server did not stop.");
    };

    futures::future::join(peer, serve).await;

    assert_eq!(
        recorder.take(),
        vec![
            Event::Message(false, b"hello world".to_vec()),
            Event::Message(true, vec![1, 2, 3]),
            Event::Message(false, b"more".to_vec()),
            Event::Pong(b"unsolicited".to_vec()),
        ]
    );
}

#[tokio::test]
async fn close_without_status() {
    let server = Server::new(Recorder::default());
    let (local, mut remote) = duplex(4096);

    let peer = async move {
        let mut buffer = BytesMut::new();
        send(&mut remote, Frame::new(OpCode::Close, &[])).await;
        let close = receive(&mut remote, &mut buffer).await;
        assert_eq!(close.close_code(), Some(1000));
    };

    let serve = async {
        timeout(TEST_TIMEOUT, server.serve(local, BytesMut::new()))
            .await
            .expect("Server did not stop.");
    };

    futures::future::join(peer, serve).await;
}

#[tokio::test]
async fn accept_raw_stream() {
    let recorder = Recorder::default();
    let server = Server::new(recorder.clone());
    let (local, mut remote) = duplex(4096);

    let peer = async move {
        let mut buffer = BytesMut::new();
        encode_request(&mut buffer, &Uri::from_static("ws://localhost/"), CHALLENGE_KEY)
            .expect("Encoding failed.");
        // A frame sent immediately after the request must not be lost.
        let mut frame = Frame::text(b"eager");
        frame.header.mask = Some(7);
        FrameCodec::default().encode(&frame, &mut buffer);
        remote.write_all(&buffer).await.expect("Write failed.");

        let mut buffer = BytesMut::new();
        read_response(&mut remote, &mut buffer, CHALLENGE_KEY)
            .await
            .expect("Handshake failed.");

        send(&mut remote, Frame::close(1000)).await;
        let close = receive(&mut remote, &mut buffer).await;
        assert_eq!(close.close_code(), Some(1000));
    };

    let serve = async {
        timeout(TEST_TIMEOUT, server.accept(local))
            .await
            .expect("Server did not stop.")
            .expect("Accept failed.");
    };

    futures::future::join(peer, serve).await;
    assert_eq!(
        recorder.take(),
        vec![Event::Message(false, b"eager".to_vec())]
    );
}

#[tokio::test]
async fn reject_without_upgrade() {
    let recorder = Recorder::default();
    let server = Server::new(recorder.clone());
    let (local, mut remote) = duplex(4096);

    let peer = async move {
        remote
            .write_all(
                b"GET /chat HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Upgrade: websocket\r\n\
                  Sec-WebSocket-Version: 13\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .expect("Write failed.");

        let mut response = String::new();
        remote
            .read_to_string(&mut response)
            .await
            .expect("Read failed.");
        response
    };

    let (response, result) = futures::future::join(peer, server.accept(local)).await;

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.ends_with(&RejectReason::NotUpgrade.to_string()));
    assert!(matches!(
        result,
        Err(AcceptError::Rejected(rejected)) if rejected.reason == RejectReason::NotUpgrade
    ));
    assert!(recorder.take().is_empty());
}

#[tokio::test]
async fn reject_old_version() {
    let server = Server::new(Recorder::default());
    let (local, mut remote) = duplex(4096);

    let peer = async move {
        remote
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: localhost\r\n\
                  Connection: Upgrade\r\n\
                  Upgrade: websocket\r\n\
                  Sec-WebSocket-Version: 8\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .expect("Write failed.");

        let mut response = String::new();
        remote
            .read_to_string(&mut response)
            .await
            .expect("Read failed.");
        response
    };

    let (response, result) = futures::future::join(peer, server.accept(local)).await;

    assert!(response.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
    assert!(response.contains("sec-websocket-version: 13\r\n"));
    assert!(matches!(result, Err(AcceptError::Rejected(_))));
}

/// Records text payloads after a delay, so that frames queue up behind the handler.
#[derive(Clone, Default)]
struct SlowRecorder {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FrameHandler for SlowRecorder {
    fn on_message<'a>(
        &'a self,
        _connection: &'a Connection,
        _is_binary: bool,
        payload: &'a [u8],
    ) -> BoxFuture<'a, ()> {
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.payloads.lock().push(payload.to_vec());
        }
        .boxed()
    }
}

#[tokio::test]
async fn queued_frames_delivered_after_hangup() {
    let recorder = SlowRecorder::default();
    let server = Server::new(recorder.clone());
    let (local, mut remote) = duplex(4096);

    let peer = async move {
        for payload in [b"a", b"b", b"c"] {
            send(&mut remote, Frame::text(payload)).await;
        }
        drop(remote);
    };

    let serve = async {
        timeout(TEST_TIMEOUT, server.serve(local, BytesMut::new()))
            .await
            .expect("Server did not stop.");
    };

    futures::future::join(peer, serve).await;

    assert_eq!(
        *recorder.payloads.lock(),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
}
