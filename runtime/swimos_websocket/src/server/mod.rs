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

use crate::config::WebSocketConfig;
use crate::connection::{Connection, ConnectionTask};
use crate::errors::{AcceptError, HandshakeRejected};
use crate::handshake::{
    build_response, default_origin_check, read_request, validate_request, write_response,
};
use crate::pool::FramePool;
use crate::protocol::{CloseCode, Frame, OpCode, Role};
use bytes::BytesMut;
use futures::future::{ready, BoxFuture};
use futures::FutureExt;
use http::{HeaderMap, Method, Response};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{event, Level};

const UPGRADE_REJECTED: &str = "Rejected a WebSocket upgrade request.";
const HANDSHAKE_COMPLETED: &str = "Server handshake completed.";
const PONG_FAILED: &str = "Failed to reply to a ping.";
const CLOSE_FAILED: &str = "Failed to reply to a close frame.";
const SHUTDOWN_FAILED: &str = "Shutting down a rejected connection failed.";
const CONNECTION_ENDED: &str = "WebSocket connection ended.";

/// Callbacks invoked for the frames received on a server connection. Each frame is passed to
/// exactly one callback and callbacks for a connection are never run concurrently.
///
/// Callbacks are run by the task that is serving the connection and should not block
/// indefinitely.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called for each data frame (text, binary or continuation).
    fn on_message<'a>(
        &'a self,
        connection: &'a Connection,
        is_binary: bool,
        payload: &'a [u8],
    ) -> BoxFuture<'a, ()>;

    /// Called for each ping frame. By default, replies with a pong carrying the same payload.
    fn on_ping<'a>(&'a self, connection: &'a Connection, payload: &'a [u8]) -> BoxFuture<'a, ()> {
        async move {
            if let Err(error) = connection.pong(payload).await {
                event!(Level::DEBUG, PONG_FAILED, ?error);
            }
        }
        .boxed()
    }

    /// Called for each pong frame. Ignored by default.
    fn on_pong<'a>(&'a self, _connection: &'a Connection, _payload: &'a [u8]) -> BoxFuture<'a, ()> {
        ready(()).boxed()
    }

    /// Called when the peer sends a close frame. By default, completes the closing handshake by
    /// echoing the status of the peer (or a normal closure if there was none).
    fn on_close<'a>(&'a self, connection: &'a Connection, code: Option<u16>) -> BoxFuture<'a, ()> {
        async move {
            let code = code.unwrap_or(CloseCode::Normal.code());
            if let Err(error) = connection.close_with(code).await {
                event!(Level::DEBUG, CLOSE_FAILED, ?error);
            }
        }
        .boxed()
    }
}

type OriginCheck = dyn Fn(&HeaderMap) -> bool + Send + Sync;

/// Accepts WebSocket upgrade requests and dispatches the frames received on upgraded
/// connections to a [`FrameHandler`].
pub struct Server<H> {
    config: WebSocketConfig,
    handler: Arc<H>,
    origin_check: Arc<OriginCheck>,
    pool: FramePool,
}

impl<H> Clone for Server<H> {
    fn clone(&self) -> Self {
        Server {
            config: self.config,
            handler: self.handler.clone(),
            origin_check: self.origin_check.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<H> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<H: FrameHandler> Server<H> {
    pub fn new(handler: H) -> Server<H> {
        Server::with_config(WebSocketConfig::default(), handler)
    }

    pub fn with_config(config: WebSocketConfig, handler: H) -> Server<H> {
        Server {
            config,
            handler: Arc::new(handler),
            origin_check: Arc::new(default_origin_check),
            pool: FramePool::new(config.pool_capacity),
        }
    }

    /// Replaces the check applied to the headers of an upgrade request to decide whether its
    /// origin is permitted. By default, requests without an `Origin` header and requests from the
    /// same host are permitted.
    pub fn with_origin_check<F>(mut self, predicate: F) -> Server<H>
    where
        F: Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.origin_check = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Validates an upgrade request, producing either the `101 Switching Protocols` response or
    /// the reason that the request was rejected.
    pub fn negotiate(
        &self,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<Response<()>, HandshakeRejected> {
        match validate_request(method, headers, |headers| (self.origin_check)(headers)) {
            Ok(accept_key) => Ok(build_response(&accept_key)),
            Err(rejected) => {
                event!(Level::WARN, UPGRADE_REJECTED, reason = %rejected.reason);
                Err(rejected)
            }
        }
    }

    /// Runs a connection over a stream that has already been upgraded, until it closes.
    ///
    /// # Arguments
    /// * `stream` - The upgraded stream.
    /// * `prefix` - Any bytes that were read from the stream after the upgrade request.
    pub async fn serve<S>(&self, stream: S, prefix: BytesMut)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let Server {
            config,
            handler,
            pool,
            ..
        } = self;
        let mut task = ConnectionTask::spawn(stream, prefix, Role::Server, *config, pool.clone());
        let connection = task.connection();

        while let Some(frame) = task.next_frame().await {
            dispatch(handler.as_ref(), &connection, &frame).await;
            task.release(frame);
        }

        while let Some(frame) = task.try_next_frame() {
            if frame.opcode().is_data() {
                dispatch(handler.as_ref(), &connection, &frame).await;
            }
            task.release(frame);
        }

        task.shutdown().await;
        event!(Level::DEBUG, CONNECTION_ENDED);
    }

    /// Performs the opening handshake over a raw stream and then serves the connection. If the
    /// request is rejected, the rejection is sent to the peer and the stream is closed.
    pub async fn accept<S>(&self, mut stream: S) -> Result<(), AcceptError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut read_buffer = BytesMut::new();
        let mut write_buffer = BytesMut::new();
        let request = read_request(&mut stream, &mut read_buffer).await?;

        match self.negotiate(request.method(), request.headers()) {
            Ok(response) => {
                write_response(
                    &mut stream,
                    &mut write_buffer,
                    response.status(),
                    response.headers(),
                    None,
                )
                .await?;
                event!(Level::TRACE, HANDSHAKE_COMPLETED, uri = %request.uri());

                self.serve(stream, read_buffer).await;
                Ok(())
            }
            Err(rejected) => {
                let body = rejected.to_string();
                write_response(
                    &mut stream,
                    &mut write_buffer,
                    rejected.status(),
                    &rejected.headers(),
                    Some(&body),
                )
                .await?;
                if let Err(error) = stream.shutdown().await {
                    event!(Level::DEBUG, SHUTDOWN_FAILED, ?error);
                }
                Err(rejected.into())
            }
        }
    }
}

async fn dispatch<H>(handler: &H, connection: &Connection, frame: &Frame)
where
    H: FrameHandler,
{
    let payload = frame.payload.as_ref();
    match frame.opcode() {
        OpCode::Ping => handler.on_ping(connection, payload).await,
        OpCode::Pong => handler.on_pong(connection, payload).await,
        OpCode::Close => handler.on_close(connection, frame.close_code()).await,
        opcode => {
            handler
                .on_message(connection, opcode == OpCode::Binary, payload)
                .await
        }
    }
}
