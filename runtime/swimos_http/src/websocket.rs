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


use std::{
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures::{ready, Future, FutureExt};
use http::Method;
use http_body_util::Full;
use hyper::{
    upgrade::{OnUpgrade, Upgraded},
    Request, Response,
};
use hyper_util::rt::TokioIo;
use swimos_websocket::handshake::headers_contains;
use swimos_websocket::{FrameHandler, HandshakeRejected, Server};

const UPGRADE_STR: &str = "Upgrade";
const WEBSOCKET_STR: &str = "websocket";
const FAILED_RESPONSE: &str = "Building response should not fail.";

/// Represents the status of an upgrade attempt during a WebSocket negotiation.
///
/// The `UpgradeStatus` enum has two variants:
///
/// - `Upgradeable`: Indicates that an upgrade was requested. It contains the result of validating
///   the request: either the `101 Switching Protocols` response or the reason for the rejection.
/// - `NotRequested`: Indicates that no upgrade was requested. It contains the original `Request<T>`
///   that was made.
pub enum UpgradeStatus<T> {
    /// Indicates that an upgrade request was made
    Upgradeable {
        /// The result of the negotiation. `Ok` with the response to send to the client if the
        /// request was valid or an `Err` with the reason that the request was rejected.
        result: Result<Response<()>, HandshakeRejected>,
        /// The original `Request<T>` that was made.
        request: Request<T>,
    },
    /// Indicates that no upgrade was requested. Contains the original `Request<T>` that was made.
    NotRequested { request: Request<T> },
}

/// Attempt to negotiate a websocket upgrade on a hyper request. A request is only considered to
/// be an upgrade request if it is a `GET` request with `Connection: Upgrade` and
/// `Upgrade: websocket` headers; the remainder of the validation is performed by the server.
///
/// # Arguments
/// * `request` - The HTTP request.
/// * `server` - The server that will run the upgraded connection.
pub fn negotiate_upgrade<T, H>(request: Request<T>, server: &Server<H>) -> UpgradeStatus<T>
where
    H: FrameHandler,
{
    let headers = request.headers();
    let has_conn = headers_contains(headers, http::header::CONNECTION, UPGRADE_STR);
    let has_upgrade = headers_contains(headers, http::header::UPGRADE, WEBSOCKET_STR);

    if request.method() == Method::GET && has_conn && has_upgrade {
        UpgradeStatus::Upgradeable {
            result: server.negotiate(request.method(), request.headers()),
            request,
        }
    } else {
        UpgradeStatus::NotRequested { request }
    }
}

/// Produce the error response for a rejected websocket upgrade request.
pub fn fail_upgrade(rejected: HandshakeRejected) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(rejected.status());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(rejected.headers());
    }
    builder
        .body(Full::from(rejected.to_string()))
        .expect(FAILED_RESPONSE)
}

/// WebSocket upgrade parts used for initialising the connection.
pub struct Upgrade<U> {
    /// The negotiated response to be sent to the client.
    pub response: Response<Full<Bytes>>,
    /// A future that performs a websocket upgrade and unwraps the upgraded socket.
    pub future: UpgradeFuture<U>,
}

/// Upgrade a hyper request to a websocket, based on a successful negotiation.
///
/// # Arguments
/// * `response` - The response produced by the negotiation.
/// * `request` - The upgrade request.
/// * `unwrap_fn` - Used to unwrap the underlying socket type from the opaque [`Upgraded`] socket
///    provided by hyper.
pub fn upgrade<U, B>(response: Response<()>, request: Request<B>, unwrap_fn: U) -> Upgrade<U> {
    let (parts, _body) = response.into_parts();

    Upgrade {
        response: Response::from_parts(parts, Full::default()),
        future: UpgradeFuture {
            upgrade: hyper::upgrade::on(request),
            unwrap_fn,
        },
    }
}

/// Trait for unwrapping the concrete type of an upgraded socket.
/// Upon a connection upgrade, hyper returns the upgraded socket indirected through a trait object.
/// The caller will generally know the real underlying type and this allows for that type to be
/// restored.
pub trait SockUnwrap {
    type Sock;

    /// Unwrap the socket (returning the underlying socket and a buffer containing any bytes
    /// that have already been read).
    fn unwrap_sock(&self, upgraded: Upgraded) -> (Self::Sock, BytesMut);
}

/// Implementation of [`SockUnwrap`] that does not unwrap the socket.
pub struct NoUnwrap;

impl SockUnwrap for NoUnwrap {
    type Sock = TokioIo<Upgraded>;

    fn unwrap_sock(&self, upgraded: Upgraded) -> (Self::Sock, BytesMut) {
        (TokioIo::new(upgraded), BytesMut::new())
    }
}

/// A future that performs a websocket upgrade and unwraps the upgraded socket. The socket and
/// any bytes that were read past the upgrade request are passed to
/// [`Server::serve`](swimos_websocket::Server::serve) to run the connection.
#[derive(Debug)]
pub struct UpgradeFuture<U> {
    upgrade: OnUpgrade,
    unwrap_fn: U,
}

impl<U> Future for UpgradeFuture<U>
where
    U: SockUnwrap + Unpin,
{
    type Output = Result<(U::Sock, BytesMut), hyper::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let UpgradeFuture { upgrade, unwrap_fn } = self.get_mut();
        Poll::Ready(Ok(unwrap_fn.unwrap_sock(ready!(upgrade.poll_unpin(cx))?)))
    }
}
