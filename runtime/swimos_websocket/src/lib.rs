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

//! An implementation of the WebSocket protocol (RFC 6455) over any duplex byte stream.
//!
//! - [`FrameCodec`] encodes and decodes individual frames.
//! - [`ConnectionTask`] runs a read task and a write task over an upgraded stream, exchanging
//!   frames with the rest of the application through bounded queues.
//! - [`Server`] validates upgrade requests and dispatches the frames received on each connection
//!   to a [`FrameHandler`].
//! - [`Client`] performs the opening handshake and exchanges frames directly on its stream.

pub mod client;
pub mod codec;
mod config;
pub mod connection;
mod errors;
pub mod handshake;
mod pool;
pub mod protocol;
pub mod server;

pub use client::{Client, Scheme};
pub use codec::{DecodeStatus, FrameCodec};
pub use config::WebSocketConfig;
pub use connection::{Connection, ConnectionTask, LifecycleState};
pub use errors::{
    AcceptError, ClientError, ConnectionClosed, HandshakeRejected, HttpError, ProtocolError,
    ReadError, RejectReason, SendError, WriteError,
};
pub use handshake::{compute_accept_key, validate_challenge_key};
pub use pool::FramePool;
pub use protocol::{CloseCode, Frame, FrameHeader, HeaderFlags, OpCode, Role};
pub use server::{FrameHandler, Server};
