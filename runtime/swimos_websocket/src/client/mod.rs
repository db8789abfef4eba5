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
use crate::config::WebSocketConfig;
use crate::errors::ClientError;
use crate::handshake::{encode_request, read_response, CHALLENGE_KEY};
use crate::pool::FramePool;
use crate::protocol::{CloseCode, Frame, OpCode};
use bytes::BytesMut;
use http::Uri;
use std::fmt::{Display, Formatter};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{event, Level};

const HANDSHAKE_COMPLETED: &str = "Client handshake completed.";
const RECEIVED_FRAME: &str = "Received frame.";

/// URL schemes accepted by the client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

impl TryFrom<&str> for Scheme {
    type Error = ClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "ws" | "http" => Ok(Scheme::Ws),
            "wss" | "https" => Ok(Scheme::Wss),
            _ => Err(ClientError::Url(format!("Unsupported scheme: `{}`", value))),
        }
    }
}

impl Scheme {
    /// Get the default port for the scheme.
    pub const fn get_default_port(&self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    /// Return if the scheme is secure.
    pub const fn is_secure(&self) -> bool {
        matches!(self, Scheme::Wss)
    }
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Ws => f.write_str("ws"),
            Scheme::Wss => f.write_str("wss"),
        }
    }
}

/// Resolves the host and port to connect to for a URL.
fn host_and_port(uri: &Uri) -> Result<(&str, u16), ClientError> {
    let scheme = match uri.scheme_str() {
        Some(scheme) => Scheme::try_from(scheme)?,
        None => return Err(ClientError::Url(format!("Missing scheme: `{}`", uri))),
    };
    if scheme.is_secure() {
        return Err(ClientError::Url(format!(
            "TLS connections are not supported: `{}`",
            uri
        )));
    }
    let host = uri
        .host()
        .ok_or_else(|| ClientError::Url(format!("Missing host: `{}`", uri)))?;
    Ok((host, uri.port_u16().unwrap_or(scheme.get_default_port())))
}

/// A WebSocket client. Every operation is performed directly on the stream by the calling task.
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    stream: S,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    codec: FrameCodec,
    /// Frames for outbound messages and the closing handshake. Inbound payloads are handed to
    /// the caller.
    pool: FramePool,
}

impl Client<TcpStream> {
    /// Opens a TCP connection to the server at `url` (`ws://` or `http://`) and performs the
    /// opening handshake.
    pub async fn dial(url: &str) -> Result<Client<TcpStream>, ClientError> {
        Client::dial_with_config(url, WebSocketConfig::default()).await
    }

    pub async fn dial_with_config(
        url: &str,
        config: WebSocketConfig,
    ) -> Result<Client<TcpStream>, ClientError> {
        let uri = url
            .parse::<Uri>()
            .map_err(|e| ClientError::Url(e.to_string()))?;
        let stream = TcpStream::connect(host_and_port(&uri)?).await?;
        Client::handshake_with_config(stream, &uri, config).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Performs the opening handshake over an established stream.
    pub async fn handshake(stream: S, uri: &Uri) -> Result<Client<S>, ClientError> {
        Client::handshake_with_config(stream, uri, WebSocketConfig::default()).await
    }

    pub async fn handshake_with_config(
        mut stream: S,
        uri: &Uri,
        config: WebSocketConfig,
    ) -> Result<Client<S>, ClientError> {
        let mut write_buffer = BytesMut::new();
        encode_request(&mut write_buffer, uri, CHALLENGE_KEY)?;
        stream.write_all(&write_buffer).await?;
        stream.flush().await?;
        write_buffer.clear();

        let mut read_buffer = BytesMut::new();
        read_response(&mut stream, &mut read_buffer, CHALLENGE_KEY).await?;
        event!(Level::TRACE, HANDSHAKE_COMPLETED, %uri);

        Ok(Client {
            stream,
            read_buffer,
            write_buffer,
            codec: FrameCodec::new(config.max_payload_size),
            pool: FramePool::new(config.pool_capacity),
        })
    }

    /// Sends a text frame. Returns the number of payload bytes written.
    pub async fn write(&mut self, payload: &[u8]) -> Result<usize, ClientError> {
        self.send(OpCode::Text, payload).await?;
        Ok(payload.len())
    }

    /// Sends a binary frame. Returns the number of payload bytes written.
    pub async fn write_binary(&mut self, payload: &[u8]) -> Result<usize, ClientError> {
        self.send(OpCode::Binary, payload).await?;
        Ok(payload.len())
    }

    pub async fn ping(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        self.send(OpCode::Ping, payload).await
    }

    /// Reads exactly one frame, returning its opcode and payload. The payload is handed over to
    /// the caller; use [`Client::read_frame`] to read into a frame that is reused across calls.
    pub async fn read(&mut self) -> Result<(OpCode, BytesMut), ClientError> {
        let mut frame = Frame::default();
        self.read_frame(&mut frame).await?;
        let Frame { header, payload } = frame;
        Ok((header.opcode, payload))
    }

    /// Reads exactly one frame into `frame`, reusing the allocation of its payload.
    pub async fn read_frame(&mut self, frame: &mut Frame) -> Result<(), ClientError> {
        let Client {
            stream,
            read_buffer,
            codec,
            ..
        } = self;

        codec.read_frame(stream, read_buffer, frame).await?;
        event!(Level::TRACE, RECEIVED_FRAME, %frame);
        Ok(())
    }

    /// Sends a close frame with a normal closure status, reads one frame in response and then
    /// shuts the stream down. Returns the status sent by the peer, if it sent one.
    pub async fn close(mut self) -> Result<Option<u16>, ClientError> {
        self.send(OpCode::Close, &CloseCode::Normal.code().to_be_bytes())
            .await?;

        let Client {
            stream,
            read_buffer,
            codec,
            pool,
            ..
        } = &mut self;
        let mut frame = pool.acquire();
        let result = codec.read_frame(stream, read_buffer, &mut frame).await;
        let code = frame.close_code();
        pool.release(frame);

        let shutdown = stream.shutdown().await;
        result?;
        shutdown?;
        Ok(code)
    }

    async fn send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), ClientError> {
        let Client {
            stream,
            write_buffer,
            codec,
            pool,
            ..
        } = self;

        let mut frame = pool.acquire();
        frame.set(opcode, payload);
        frame.header.mask = Some(rand::random());
        let result = codec.write_frame(stream, write_buffer, &frame).await;
        pool.release(frame);
        result?;
        Ok(())
    }
}
